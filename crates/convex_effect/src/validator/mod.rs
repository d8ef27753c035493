//! Validators in the host's own language.
//!
//! The host checks arguments, return values and documents against these. They
//! are produced from schemas by the bridge, or written by hand for native
//! function signatures.

mod json;

use std::{
    collections::BTreeMap,
    fmt::{
        self,
        Display,
    },
};

pub use self::json::{
    FieldTypeJson,
    ValidatorJson,
};
use crate::{
    types::TableName,
    value::{
        Object,
        Value,
    },
};

/// Validates that a value has the given type.
#[derive(Clone, Debug, PartialEq)]
pub enum Validator {
    Id(TableName),
    Null,
    Float64,
    Int64,
    Boolean,
    String,
    Literal(LiteralValidator),
    Array(Box<Validator>),
    Record(Box<Validator>, Box<Validator>),
    Object(ObjectValidator),
    Union(Vec<Validator>),
    Any,
}

fn display_sequence<T: Display>(
    f: &mut fmt::Formatter<'_>,
    [open, close]: [&str; 2],
    items: impl Iterator<Item = T>,
) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "{close}")
}

impl Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Validator::Id(table_name) => write!(f, "v.id(\"{table_name}\")"),
            Validator::Null => write!(f, "v.null()"),
            Validator::Float64 => write!(f, "v.float64()"),
            Validator::Int64 => write!(f, "v.int64()"),
            Validator::Boolean => write!(f, "v.boolean()"),
            Validator::String => write!(f, "v.string()"),
            Validator::Literal(literal) => write!(f, "v.literal({literal})"),
            Validator::Array(validator) => write!(f, "v.array({validator})"),
            Validator::Record(keys, values) => write!(f, "v.record({keys}, {values})"),
            Validator::Object(object_validator) => write!(f, "{object_validator}"),
            Validator::Union(validators) => {
                display_sequence(f, ["v.union(", ")"], validators.iter())
            },
            Validator::Any => write!(f, "v.any()"),
        }
    }
}

impl Validator {
    pub fn check_value(&self, value: &Value) -> Result<(), ValidationError> {
        self.check_value_internal(value, ValidationContext::new())
    }

    fn check_value_internal(
        &self,
        value: &Value,
        context: ValidationContext,
    ) -> Result<(), ValidationError> {
        match (self, value) {
            // Ids are opaque here; the host checks the table when it
            // normalizes them.
            (Validator::Id(_), Value::String(_))
            | (Validator::Null, Value::Null)
            | (Validator::Float64, Value::Float64(_))
            | (Validator::Int64, Value::Int64(_))
            | (Validator::Boolean, Value::Boolean(_))
            | (Validator::String, Value::String(_)) => return Ok(()),
            (Validator::Literal(literal), value) => {
                let literal_as_value: Value = literal.clone().into();
                if value != &literal_as_value {
                    return Err(ValidationError::LiteralValuesDoNotMatch {
                        value: value.clone(),
                        literal_validator: literal.clone(),
                        context,
                    });
                }
            },
            (Validator::Array(t), Value::Array(v)) => {
                for (i, elt) in v.iter().enumerate() {
                    t.check_value_internal(elt, context.with(format!("[{i}]")))?;
                }
            },
            (Validator::Record(key_type, value_type), Value::Object(object)) => {
                for (key, value) in object {
                    key_type.check_value_internal(
                        &Value::from(key.as_str()),
                        context.with(".keys()".to_string()),
                    )?;
                    value_type.check_value_internal(value, context.with(".values()".to_string()))?;
                }
            },
            (Validator::Object(object_validator), Value::Object(object)) => {
                for (field_name, field_type) in &object_validator.0 {
                    if let Some(value) = object.get(field_name) {
                        field_type
                            .validator
                            .check_value_internal(value, context.with(format!(".{field_name}")))?
                    } else if !field_type.optional {
                        return Err(ValidationError::MissingRequiredField {
                            object: object.clone(),
                            field_name: field_name.clone(),
                            object_validator: object_validator.clone(),
                            context,
                        });
                    }
                }
                for field in object.keys() {
                    if !object_validator.0.contains_key(field) {
                        return Err(ValidationError::ExtraField {
                            object: object.clone(),
                            field_name: field.clone(),
                            object_validator: object_validator.clone(),
                            context,
                        });
                    }
                }
            },
            (Validator::Union(validators), value) => {
                if validators.len() == 1 {
                    return validators[0].check_value_internal(value, context);
                }
                for t in validators {
                    if t.check_value_internal(value, context.clone()).is_ok() {
                        return Ok(());
                    }
                }
                return Err(ValidationError::NoMatch {
                    value: value.clone(),
                    validator: self.clone(),
                    context,
                });
            },
            (Validator::Any, _) => return Ok(()),
            (..) => {
                return Err(ValidationError::NoMatch {
                    value: value.clone(),
                    validator: self.clone(),
                    context,
                });
            },
        };
        Ok(())
    }

    /// Returns `true` when it is sometimes possible to have a field with the
    /// given dotted path on a value accepted by this validator, or `false`
    /// when it is never possible.
    pub fn can_contain_field(&self, field_path: &str) -> bool {
        let parts: Vec<&str> = field_path.split('.').collect();
        self._can_contain_field(&parts)
    }

    fn _can_contain_field(&self, field_path_parts: &[&str]) -> bool {
        let Some(first_part) = field_path_parts.first() else {
            return true;
        };

        match &self {
            Validator::Any => true,
            Validator::Union(cases) => cases
                .iter()
                .any(|case| case._can_contain_field(field_path_parts)),
            Validator::Object(ObjectValidator(fields)) => fields
                .get(*first_part)
                .map(|field_validator| {
                    field_validator
                        .validator
                        ._can_contain_field(&field_path_parts[1..])
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Returns true if the field at `field_path` may hold an array of
    /// numbers, which vector indexes require.
    pub fn overlaps_with_array_float64(&self, field_path: &str) -> bool {
        let parts: Vec<&str> = field_path.split('.').collect();
        self._overlaps_with_array_float64(&parts)
    }

    fn is_valid_vector_validator(validator: &Validator) -> bool {
        match validator {
            Validator::Array(validator) => {
                matches!(**validator, Validator::Float64 | Validator::Any)
            },
            Validator::Any => true,
            Validator::Union(validators) => validators.iter().any(Self::is_valid_vector_validator),
            _ => false,
        }
    }

    fn _overlaps_with_array_float64(&self, field_path_parts: &[&str]) -> bool {
        let Some(first_part) = field_path_parts.first() else {
            return Self::is_valid_vector_validator(self);
        };

        match &self {
            Validator::Any => true,
            Validator::Union(cases) => cases
                .iter()
                .any(|case| case._overlaps_with_array_float64(field_path_parts)),
            Validator::Object(ObjectValidator(fields)) => fields
                .get(*first_part)
                .map(|field_validator| {
                    field_validator
                        .validator
                        ._overlaps_with_array_float64(&field_path_parts[1..])
                })
                .unwrap_or(true),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationContext(Option<String>);

impl ValidationContext {
    pub fn new() -> Self {
        ValidationContext(None)
    }

    pub fn with(&self, new_context: String) -> Self {
        match &self.0 {
            Some(context) => Self(Some(format!("{context}{new_context}"))),
            None => Self(Some(new_context)),
        }
    }
}

impl Display for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.0 {
            write!(f, "Path: {}", context)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValidator {
    Float64(f64),
    Int64(i64),
    Boolean(bool),
    String(String),
}

impl Display for LiteralValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValidator::Float64(float) => write!(f, "{float:?}"),
            LiteralValidator::Int64(int) => write!(f, "{int}n"),
            LiteralValidator::Boolean(bool) => write!(f, "{bool}"),
            LiteralValidator::String(string) => write!(f, "{string:?}"),
        }
    }
}

impl From<LiteralValidator> for Value {
    fn from(literal: LiteralValidator) -> Self {
        match literal {
            LiteralValidator::Float64(float) => Value::Float64(float),
            LiteralValidator::Int64(int) => Value::Int64(int),
            LiteralValidator::Boolean(bool) => Value::Boolean(bool),
            LiteralValidator::String(string) => Value::String(string),
        }
    }
}

impl TryFrom<Value> for LiteralValidator {
    type Error = anyhow::Error;

    fn try_from(v: Value) -> anyhow::Result<Self> {
        match v {
            Value::Float64(f) => Ok(LiteralValidator::Float64(f)),
            Value::Int64(i) => Ok(LiteralValidator::Int64(i)),
            Value::Boolean(b) => Ok(LiteralValidator::Boolean(b)),
            Value::String(s) => Ok(LiteralValidator::String(s)),
            _ => Err(anyhow::anyhow!("Value {v} is not a valid literal.")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectValidator(pub BTreeMap<String, FieldValidator>);

#[macro_export]
macro_rules! object_validator {
    ($($field_name:expr => $field_type:expr),* $(,)?) => {
        {
            #[allow(unused_mut)]
            let mut fields = ::std::collections::BTreeMap::new();
            {
                $(fields.insert($field_name.to_string(), $field_type);)*
            }
            $crate::validator::ObjectValidator(fields)
        }
    };
}

impl Display for ObjectValidator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        display_sequence(
            f,
            ["v.object({", "})"],
            self.0.iter().map(|(name, field)| format!("{name}: {field}")),
        )
    }
}

/// Object fields can be optional.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldValidator {
    pub(crate) validator: Validator,
    pub(crate) optional: bool,
}

impl FieldValidator {
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn required_field_type(validator: Validator) -> Self {
        Self {
            validator,
            optional: false,
        }
    }

    pub fn optional_field_type(validator: Validator) -> Self {
        Self {
            validator,
            optional: true,
        }
    }
}

impl Display for FieldValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            write!(f, "v.optional({})", self.validator)
        } else {
            write!(f, "{}", self.validator)
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("`{value}` does not match literal validator `v.literal({literal_validator})`.{context}")]
    LiteralValuesDoNotMatch {
        value: Value,
        literal_validator: LiteralValidator,
        context: ValidationContext,
    },
    #[error(
        "Object is missing the required field `{field_name}`. Consider wrapping the field \
         validator in `v.optional(...)` if this is expected.
{context}
Object: {}
Validator: {object_validator}",
        Value::Object(.object.clone())
    )]
    MissingRequiredField {
        object: Object,
        field_name: String,
        object_validator: ObjectValidator,
        context: ValidationContext,
    },
    #[error(
        "Object contains extra field `{field_name}` that is not in the validator.
{context}
Object: {}
Validator: {object_validator}",
        Value::Object(.object.clone())
    )]
    ExtraField {
        object: Object,
        field_name: String,
        object_validator: ObjectValidator,
        context: ValidationContext,
    },
    #[error("Value does not match validator.\n{context}\nValue: {value}\nValidator: {validator}")]
    NoMatch {
        value: Value,
        validator: Validator,
        context: ValidationContext,
    },
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{
        FieldValidator,
        LiteralValidator,
        ValidationContext,
        ValidationError,
        Validator,
    };
    use crate::value::Value;

    #[test]
    fn test_display() -> anyhow::Result<()> {
        let validator = Validator::Object(object_validator!(
            "name" => FieldValidator::required_field_type(Validator::String),
            "age" => FieldValidator::optional_field_type(Validator::Float64),
            "author" => FieldValidator::required_field_type(Validator::Id("users".parse()?)),
        ));
        assert_eq!(
            validator.to_string(),
            "v.object({age: v.optional(v.float64()), author: v.id(\"users\"), name: v.string()})"
        );
        Ok(())
    }

    #[test]
    fn test_check_object() -> anyhow::Result<()> {
        let validator = Validator::Object(object_validator!(
            "name" => FieldValidator::required_field_type(Validator::String),
            "tags" => FieldValidator::optional_field_type(
                Validator::Array(Box::new(Validator::String))
            ),
        ));
        validator.check_value(&Value::try_from(json!({"name": "ada"}))?)?;
        validator.check_value(&Value::try_from(json!({"name": "ada", "tags": ["x"]}))?)?;

        let err = validator
            .check_value(&Value::try_from(json!({"name": "ada", "tags": ["x", 1]}))?)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::NoMatch {
                value: Value::Int64(1),
                validator: Validator::String,
                context: ValidationContext::new().with(".tags[1]".to_string()),
            }
        );

        let err = validator
            .check_value(&Value::try_from(json!({"tags": []}))?)
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingRequiredField { field_name, .. } if field_name == "name"));
        Ok(())
    }

    #[test]
    fn test_check_literal_and_union() -> anyhow::Result<()> {
        let validator = Validator::Union(vec![
            Validator::Literal(LiteralValidator::String("a".to_string())),
            Validator::Null,
        ]);
        validator.check_value(&Value::from("a"))?;
        validator.check_value(&Value::Null)?;
        assert!(validator.check_value(&Value::from("b")).is_err());
        Ok(())
    }

    #[test]
    fn test_can_contain_field() {
        let validator = Validator::Object(object_validator!(
            "author" => FieldValidator::required_field_type(Validator::Object(object_validator!(
                "name" => FieldValidator::required_field_type(Validator::String),
            ))),
            "embedding" => FieldValidator::required_field_type(
                Validator::Array(Box::new(Validator::Float64))
            ),
        ));
        assert!(validator.can_contain_field("author.name"));
        assert!(!validator.can_contain_field("author.age"));
        assert!(validator.overlaps_with_array_float64("embedding"));
        assert!(!validator.overlaps_with_array_float64("author"));
    }
}
