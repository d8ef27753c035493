use std::fmt::{
    self,
    Display,
};

use super::{
    Check,
    LiteralValue,
    Schema,
    TransformKind,
};
use crate::value::{
    Object,
    Value,
};

/// Where in a value an issue was found, eg `.tags[2]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsePath(String);

impl ParsePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub(crate) fn with(&self, segment: impl Display) -> Self {
        Self(format!("{}{segment}", self.0))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ParsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum IssueKind {
    #[error("Expected {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("Expected the literal {expected}, found {actual}")]
    LiteralMismatch { expected: LiteralValue, actual: Value },
    #[error("Missing required field `{field}`")]
    MissingField { field: String },
    #[error("Unexpected field `{field}`")]
    ExtraField { field: String },
    #[error("{actual} matches no member of {expected}")]
    NoUnionMember { expected: String, actual: Value },
    #[error("Expected {expected} elements, found {actual}")]
    TupleLength { expected: String, actual: usize },
    #[error("{value} fails the check {check}")]
    Refinement { check: Check, value: Value },
    #[error("Transformation {kind} failed: {message}")]
    Transform {
        kind: TransformKind,
        message: String,
    },
}

/// A value that didn't match a schema.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseIssue {
    path: ParsePath,
    kind: IssueKind,
}

impl ParseIssue {
    pub fn new(path: ParsePath, kind: IssueKind) -> Self {
        Self { path, kind }
    }

    pub fn path(&self) -> &ParsePath {
        &self.path
    }

    pub fn kind(&self) -> &IssueKind {
        &self.kind
    }
}

impl Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_root() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} at {}", self.kind, self.path)
        }
    }
}

impl std::error::Error for ParseIssue {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Decode,
    Encode,
}

impl Schema {
    /// Check an encoded value against the schema and produce its decoded
    /// form.
    pub fn decode(&self, value: &Value) -> Result<Value, ParseIssue> {
        self.parse(value, Direction::Decode, &ParsePath::root())
    }

    /// Check a decoded value against the schema and produce its encoded form.
    pub fn encode(&self, value: &Value) -> Result<Value, ParseIssue> {
        self.parse(value, Direction::Encode, &ParsePath::root())
    }

    fn parse(
        &self,
        value: &Value,
        direction: Direction,
        path: &ParsePath,
    ) -> Result<Value, ParseIssue> {
        let mismatch = || {
            ParseIssue::new(
                path.clone(),
                IssueKind::TypeMismatch {
                    expected: self.to_string(),
                    actual: value.type_name().to_string(),
                },
            )
        };
        match (self, value) {
            (Schema::Any | Schema::Unknown, _) => Ok(value.clone()),
            (Schema::Literal(literal), _) => {
                let expected = literal.to_value();
                let matches = match (literal, value) {
                    (LiteralValue::Float64(f), Value::Int64(i)) => *f == *i as f64,
                    _ => &expected == value,
                };
                if !matches {
                    return Err(ParseIssue::new(
                        path.clone(),
                        IssueKind::LiteralMismatch {
                            expected: literal.clone(),
                            actual: value.clone(),
                        },
                    ));
                }
                Ok(expected)
            },
            (Schema::Union(members), _) => members
                .iter()
                .find_map(|member| member.parse(value, direction, path).ok())
                .ok_or_else(|| {
                    ParseIssue::new(
                        path.clone(),
                        IssueKind::NoUnionMember {
                            expected: self.to_string(),
                            actual: value.clone(),
                        },
                    )
                }),
            (Schema::Tuple { elements, rest }, Value::Array(items)) => {
                let required = elements.iter().filter(|e| !e.optional).count();
                if items.len() < required || (rest.is_none() && items.len() > elements.len()) {
                    let expected = match rest {
                        Some(_) => format!("at least {required}"),
                        None if required == elements.len() => required.to_string(),
                        None => format!("{required} to {}", elements.len()),
                    };
                    return Err(ParseIssue::new(
                        path.clone(),
                        IssueKind::TupleLength {
                            expected,
                            actual: items.len(),
                        },
                    ));
                }
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let schema = match elements.get(i) {
                        Some(element) => &element.schema,
                        None => rest.as_deref().ok_or_else(mismatch)?,
                    };
                    out.push(schema.parse(item, direction, &path.with(format!("[{i}]")))?);
                }
                Ok(Value::Array(out))
            },
            (Schema::Struct(fields), Value::Object(object)) => {
                let mut out = Object::new();
                for field in fields {
                    let field_path = path.with(format!(".{}", field.name));
                    match object.get(&field.name) {
                        // `None` in an `Option<T>` field serializes as null.
                        Some(Value::Null)
                            if field.optional
                                && field.schema.parse(&Value::Null, direction, path).is_err() => {},
                        Some(v) => {
                            out.insert(
                                field.name.clone(),
                                field.schema.parse(v, direction, &field_path)?,
                            );
                        },
                        None if field.optional => {},
                        None => {
                            return Err(ParseIssue::new(
                                path.clone(),
                                IssueKind::MissingField {
                                    field: field.name.clone(),
                                },
                            ));
                        },
                    }
                }
                if let Some(extra) = object
                    .keys()
                    .find(|k| !fields.iter().any(|field| &field.name == *k))
                {
                    return Err(ParseIssue::new(
                        path.clone(),
                        IssueKind::ExtraField {
                            field: extra.clone(),
                        },
                    ));
                }
                Ok(Value::Object(out))
            },
            (Schema::Record { key, value: values }, Value::Object(object)) => {
                let mut out = Object::new();
                for (k, v) in object {
                    let key_path = path.with(format!("[{k:?}]"));
                    let Value::String(parsed_key) =
                        key.parse(&Value::String(k.clone()), direction, &key_path)?
                    else {
                        return Err(mismatch());
                    };
                    out.insert(parsed_key, values.parse(v, direction, &key_path)?);
                }
                Ok(Value::Object(out))
            },
            (Schema::Number, Value::Float64(_)) => Ok(value.clone()),
            (Schema::Number, Value::Int64(i)) => Ok(Value::Float64(*i as f64)),
            (Schema::BigInt, Value::Int64(_))
            | (Schema::Boolean, Value::Boolean(_))
            | (Schema::String { .. }, Value::String(_)) => Ok(value.clone()),
            (Schema::Refinement { from, check }, _) => match direction {
                Direction::Decode => {
                    let decoded = from.parse(value, direction, path)?;
                    refine(check, decoded, path)
                },
                Direction::Encode => {
                    let checked = refine(check, value.clone(), path)?;
                    from.parse(&checked, direction, path)
                },
            },
            (Schema::Transform { from, to, kind }, _) => match direction {
                Direction::Decode => {
                    let encoded = from.parse(value, direction, path)?;
                    let transformed = kind.decode(encoded, path)?;
                    to.parse(&transformed, direction, path)
                },
                Direction::Encode => {
                    let decoded = to.parse(value, direction, path)?;
                    let transformed = kind.encode(decoded, path)?;
                    from.parse(&transformed, direction, path)
                },
            },
            _ => Err(mismatch()),
        }
    }
}

fn refine(check: &Check, value: Value, path: &ParsePath) -> Result<Value, ParseIssue> {
    if check.holds(&value) {
        Ok(value)
    } else {
        Err(ParseIssue::new(
            path.clone(),
            IssueKind::Refinement {
                check: check.clone(),
                value,
            },
        ))
    }
}

impl TransformKind {
    fn decode(self, value: Value, path: &ParsePath) -> Result<Value, ParseIssue> {
        match (self, value) {
            (TransformKind::Trim, Value::String(s)) => Ok(Value::String(s.trim().to_string())),
            (TransformKind::NumberFromString, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float64)
                .map_err(|e| self.failure(path, format!("\"{s}\" is not a number: {e}"))),
            (_, value) => {
                Err(self.failure(path, format!("cannot decode a {}", value.type_name())))
            },
        }
    }

    fn encode(self, value: Value, path: &ParsePath) -> Result<Value, ParseIssue> {
        match (self, value) {
            (TransformKind::Trim, value @ Value::String(_)) => Ok(value),
            (TransformKind::NumberFromString, Value::Float64(f)) => Ok(Value::String(f.to_string())),
            (_, value) => {
                Err(self.failure(path, format!("cannot encode a {}", value.type_name())))
            },
        }
    }

    fn failure(self, path: &ParsePath, message: String) -> ParseIssue {
        ParseIssue::new(
            path.clone(),
            IssueKind::Transform {
                kind: self,
                message,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::IssueKind;
    use crate::{
        schema::{
            s,
            Check,
            Schema,
        },
        struct_schema,
        value::Value,
    };

    fn person() -> Schema {
        struct_schema!(
            "name" => s.trimmed(),
            "age" => s.optional(s.number().refine(Check::NonNegative)),
        )
    }

    #[test]
    fn test_struct_decode() -> anyhow::Result<()> {
        let decoded = person().decode(&Value::try_from(json!({"name": "  ada ", "age": 36}))?)?;
        assert_eq!(decoded, Value::try_from(json!({"name": "ada", "age": 36.0}))?);

        let without_age = person().decode(&Value::try_from(json!({"name": "ada"}))?)?;
        assert_eq!(without_age, Value::try_from(json!({"name": "ada"}))?);
        Ok(())
    }

    #[test]
    fn test_null_optional_field_is_absent() -> anyhow::Result<()> {
        let encoded = person().encode(&Value::try_from(json!({"name": "ada", "age": null}))?)?;
        assert_eq!(encoded, Value::try_from(json!({"name": "ada"}))?);

        let nullable = struct_schema!("note" => s.optional(s.union([s.string(), s.null()])));
        let encoded = nullable.encode(&Value::try_from(json!({"note": null}))?)?;
        assert_eq!(encoded, Value::try_from(json!({"note": null}))?);
        Ok(())
    }

    #[test]
    fn test_struct_issues() -> anyhow::Result<()> {
        let issue = person()
            .decode(&Value::try_from(json!({"age": 3}))?)
            .unwrap_err();
        assert_eq!(
            issue.kind(),
            &IssueKind::MissingField {
                field: "name".to_string()
            }
        );

        let issue = person()
            .decode(&Value::try_from(json!({"name": "a", "nickname": "b"}))?)
            .unwrap_err();
        assert!(matches!(issue.kind(), IssueKind::ExtraField { field } if field == "nickname"));

        let issue = person()
            .decode(&Value::try_from(json!({"name": "a", "age": -1}))?)
            .unwrap_err();
        assert_eq!(issue.path().to_string(), ".age");
        assert!(matches!(issue.kind(), IssueKind::NoUnionMember { .. }));
        Ok(())
    }

    #[test]
    fn test_number_from_string() -> anyhow::Result<()> {
        let schema = s.number_from_string();
        assert_eq!(schema.decode(&"2.5".into())?, Value::Float64(2.5));
        assert_eq!(schema.encode(&Value::Float64(3.0))?, Value::from("3"));
        assert!(schema.decode(&"two".into()).is_err());
        assert!(schema.encode(&"two".into()).is_err());
        Ok(())
    }

    #[test]
    fn test_tuples() -> anyhow::Result<()> {
        let pair = s.tuple([s.string(), s.big_int()]);
        assert!(pair.decode(&Value::try_from(json!(["a", 1]))?).is_ok());
        let issue = pair.decode(&Value::try_from(json!(["a"]))?).unwrap_err();
        assert!(matches!(issue.kind(), IssueKind::TupleLength { actual: 1, .. }));
        let issue = pair.decode(&Value::try_from(json!(["a", 1.5]))?).unwrap_err();
        assert_eq!(issue.path().to_string(), "[1]");

        let list = s.array(s.number());
        assert_eq!(
            list.decode(&Value::try_from(json!([1, 2.5]))?)?,
            Value::Array(vec![Value::Float64(1.0), Value::Float64(2.5)])
        );
        Ok(())
    }

    #[test]
    fn test_union_takes_first_match() -> anyhow::Result<()> {
        let schema = s.union([s.literal("a"), s.string()]);
        assert_eq!(schema.decode(&"a".into())?, Value::from("a"));
        assert_eq!(schema.decode(&"b".into())?, Value::from("b"));
        assert!(schema.decode(&Value::Null).is_err());
        Ok(())
    }

    #[test]
    fn test_records() -> anyhow::Result<()> {
        let schema = s.record(s.string(), s.big_int());
        assert!(schema.decode(&Value::try_from(json!({"a": 1, "b": 2}))?).is_ok());
        let issue = schema
            .decode(&Value::try_from(json!({"a": "x"}))?)
            .unwrap_err();
        assert_eq!(issue.path().to_string(), "[\"a\"]");
        Ok(())
    }

    #[test]
    fn test_never_and_undefined_match_nothing() {
        assert!(Schema::Never.decode(&Value::Null).is_err());
        assert!(Schema::Undefined.decode(&Value::Null).is_err());
    }
}
