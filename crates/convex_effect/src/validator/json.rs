//! The JSON form of validators, as written into function manifests and
//! schema exports. Only the writing direction exists: the host reads these,
//! nothing here parses them back.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::{
    FieldValidator,
    LiteralValidator,
    ObjectValidator,
    Validator,
};

/// Int64 literals are written as `{"$integer": <base64 of the LE bytes>}`.
const INTEGER_TAG: &str = "$integer";

#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldTypeJson {
    field_type: ValidatorJson,
    optional: bool,
}

impl TryFrom<FieldValidator> for FieldTypeJson {
    type Error = anyhow::Error;

    fn try_from(field: FieldValidator) -> anyhow::Result<FieldTypeJson> {
        Ok(FieldTypeJson {
            field_type: field.validator.try_into()?,
            optional: field.optional,
        })
    }
}

#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum ValidatorJson {
    Null,
    Number,
    Bigint,
    Boolean,
    String,
    Any,
    Literal {
        value: JsonValue,
    },
    #[serde(rename_all = "camelCase")]
    Id {
        table_name: String,
    },
    Array {
        value: Box<ValidatorJson>,
    },
    Record {
        keys: Box<ValidatorJson>,
        values: Box<FieldTypeJson>,
    },
    Object {
        value: BTreeMap<String, FieldTypeJson>,
    },
    Union {
        value: Vec<ValidatorJson>,
    },
}

impl TryFrom<Validator> for ValidatorJson {
    type Error = anyhow::Error;

    fn try_from(validator: Validator) -> anyhow::Result<ValidatorJson> {
        let boxed = |inner: Validator| -> anyhow::Result<Box<ValidatorJson>> {
            Ok(Box::new(inner.try_into()?))
        };
        Ok(match validator {
            Validator::Null => ValidatorJson::Null,
            Validator::Float64 => ValidatorJson::Number,
            Validator::Int64 => ValidatorJson::Bigint,
            Validator::Boolean => ValidatorJson::Boolean,
            Validator::String => ValidatorJson::String,
            Validator::Any => ValidatorJson::Any,
            Validator::Id(table) => ValidatorJson::Id {
                table_name: table.to_string(),
            },
            Validator::Literal(literal) => ValidatorJson::Literal {
                value: literal_json(literal)?,
            },
            Validator::Array(element) => ValidatorJson::Array {
                value: boxed(*element)?,
            },
            // Record values are never optional on the wire.
            Validator::Record(keys, values) => ValidatorJson::Record {
                keys: boxed(*keys)?,
                values: Box::new(FieldValidator::required_field_type(*values).try_into()?),
            },
            Validator::Object(object) => ValidatorJson::Object {
                value: object_json(object)?,
            },
            Validator::Union(members) => ValidatorJson::Union {
                value: members
                    .into_iter()
                    .map(ValidatorJson::try_from)
                    .collect::<anyhow::Result<_>>()?,
            },
        })
    }
}

fn literal_json(literal: LiteralValidator) -> anyhow::Result<JsonValue> {
    Ok(match literal {
        LiteralValidator::Boolean(b) => JsonValue::Bool(b),
        LiteralValidator::String(string) => JsonValue::String(string),
        LiteralValidator::Float64(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .ok_or_else(|| anyhow::anyhow!("Literal {f} has no JSON representation"))?,
        LiteralValidator::Int64(i) => {
            let mut tagged = serde_json::Map::new();
            tagged.insert(
                INTEGER_TAG.to_string(),
                JsonValue::String(base64::encode(i.to_le_bytes())),
            );
            JsonValue::Object(tagged)
        },
    })
}

fn object_json(object: ObjectValidator) -> anyhow::Result<BTreeMap<String, FieldTypeJson>> {
    object
        .0
        .into_iter()
        .map(|(name, field)| anyhow::Ok((name, FieldTypeJson::try_from(field)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::ValidatorJson;
    use crate::validator::{
        FieldValidator,
        LiteralValidator,
        Validator,
    };

    fn to_json(validator: Validator) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(ValidatorJson::try_from(validator)?)?)
    }

    #[test]
    fn test_object_json() -> anyhow::Result<()> {
        let validator = Validator::Object(crate::object_validator!(
            "author" => FieldValidator::required_field_type(Validator::Id("users".parse()?)),
            "score" => FieldValidator::optional_field_type(Validator::Float64),
        ));
        assert_eq!(
            to_json(validator)?,
            json!({
                "type": "object",
                "value": {
                    "author": {"fieldType": {"type": "id", "tableName": "users"}, "optional": false},
                    "score": {"fieldType": {"type": "number"}, "optional": true},
                },
            })
        );
        Ok(())
    }

    #[test]
    fn test_literal_json() -> anyhow::Result<()> {
        assert_eq!(
            to_json(Validator::Literal(LiteralValidator::Int64(-5)))?,
            json!({"type": "literal", "value": {"$integer": "+/////////8="}})
        );
        assert_eq!(
            to_json(Validator::Literal(LiteralValidator::String("draft".to_string())))?,
            json!({"type": "literal", "value": "draft"})
        );
        assert!(to_json(Validator::Literal(LiteralValidator::Float64(f64::NAN))).is_err());
        Ok(())
    }

    #[test]
    fn test_record_and_union_json() -> anyhow::Result<()> {
        let validator = Validator::Record(
            Box::new(Validator::String),
            Box::new(Validator::Union(vec![Validator::Int64, Validator::Null])),
        );
        assert_eq!(
            to_json(validator)?,
            json!({
                "type": "record",
                "keys": {"type": "string"},
                "values": {
                    "fieldType": {"type": "union", "value": [{"type": "bigint"}, {"type": "null"}]},
                    "optional": false,
                },
            })
        );
        Ok(())
    }
}
