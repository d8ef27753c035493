//! Schema descriptions of record types.
//!
//! A [`Schema`] describes a value's shape along with refinements and
//! transformations applied while decoding and encoding. Schemas are the
//! source of truth for models and function signatures; the validators the
//! host understands are compiled from them by [`bridge::compile`].

pub mod bridge;
mod parse;

use std::fmt::{
    self,
    Display,
};

pub use self::parse::{
    IssueKind,
    ParseIssue,
    ParsePath,
};
use crate::{
    types::TableName,
    value::Value,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Schema {
    Any,
    Unknown,
    Literal(LiteralValue),
    Union(Vec<Schema>),
    Tuple {
        elements: Vec<TupleElement>,
        rest: Option<Box<Schema>>,
    },
    Struct(Vec<PropertySignature>),
    Record {
        key: Box<Schema>,
        value: Box<Schema>,
    },
    Number,
    BigInt,
    Boolean,
    /// `table` tags the string as an identifier of a document in that table.
    String { table: Option<TableName> },
    Refinement {
        from: Box<Schema>,
        check: Check,
    },
    Transform {
        from: Box<Schema>,
        to: Box<Schema>,
        kind: TransformKind,
    },
    Undefined,
    Never,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
    Null,
    Boolean(bool),
    Float64(f64),
    Int64(i64),
    String(String),
}

impl LiteralValue {
    pub fn to_value(&self) -> Value {
        match self {
            LiteralValue::Null => Value::Null,
            LiteralValue::Boolean(b) => Value::Boolean(*b),
            LiteralValue::Float64(f) => Value::Float64(*f),
            LiteralValue::Int64(i) => Value::Int64(*i),
            LiteralValue::String(string) => Value::String(string.clone()),
        }
    }
}

impl Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Null => write!(f, "null"),
            LiteralValue::Boolean(b) => write!(f, "{b}"),
            LiteralValue::Float64(n) => write!(f, "{n:?}"),
            LiteralValue::Int64(i) => write!(f, "{i}n"),
            LiteralValue::String(string) => write!(f, "{string:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TupleElement {
    pub schema: Schema,
    pub optional: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertySignature {
    pub name: String,
    pub schema: Schema,
    pub optional: bool,
}

/// Refinements checked after decoding and before encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Check {
    MinLength(usize),
    MaxLength(usize),
    NonEmpty,
    Int,
    NonNegative,
    Between { min: f64, max: f64 },
}

impl Check {
    pub(crate) fn holds(&self, value: &Value) -> bool {
        let length = |v: &Value| match v {
            Value::String(string) => Some(string.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        let number = |v: &Value| match v {
            Value::Float64(f) => Some(*f),
            Value::Int64(i) => Some(*i as f64),
            _ => None,
        };
        match self {
            Check::MinLength(min) => length(value).is_some_and(|n| n >= *min),
            Check::MaxLength(max) => length(value).is_some_and(|n| n <= *max),
            Check::NonEmpty => length(value).is_some_and(|n| n > 0),
            Check::Int => number(value).is_some_and(|n| n.fract() == 0.0),
            Check::NonNegative => number(value).is_some_and(|n| n >= 0.0),
            Check::Between { min, max } => number(value).is_some_and(|n| n >= *min && n <= *max),
        }
    }
}

impl Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::MinLength(n) => write!(f, "minLength({n})"),
            Check::MaxLength(n) => write!(f, "maxLength({n})"),
            Check::NonEmpty => write!(f, "nonEmpty()"),
            Check::Int => write!(f, "int()"),
            Check::NonNegative => write!(f, "nonNegative()"),
            Check::Between { min, max } => write!(f, "between({min:?}, {max:?})"),
        }
    }
}

/// Transformations between an encoded form (what is stored) and a decoded
/// form (what handlers see).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformKind {
    /// Decoding trims whitespace. Encoding passes the string through.
    Trim,
    /// Stored as a string, decoded as a number.
    NumberFromString,
}

impl Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformKind::Trim => write!(f, "trim"),
            TransformKind::NumberFromString => write!(f, "numberFromString"),
        }
    }
}

impl Schema {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Schema::Any => "any",
            Schema::Unknown => "unknown",
            Schema::Literal(_) => "literal",
            Schema::Union(_) => "union",
            Schema::Tuple { .. } => "tuple",
            Schema::Struct(_) => "struct",
            Schema::Record { .. } => "record",
            Schema::Number => "number",
            Schema::BigInt => "bigint",
            Schema::Boolean => "boolean",
            Schema::String { .. } => "string",
            Schema::Refinement { .. } => "refinement",
            Schema::Transform { .. } => "transform",
            Schema::Undefined => "undefined",
            Schema::Never => "never",
        }
    }

    /// The fields of a struct schema.
    pub fn fields(&self) -> Option<&[PropertySignature]> {
        match self {
            Schema::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn refine(self, check: Check) -> Schema {
        Schema::Refinement {
            from: Box::new(self),
            check,
        }
    }
}

/// A struct field under construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub schema: Schema,
    pub optional: bool,
}

impl From<Schema> for Field {
    fn from(schema: Schema) -> Self {
        Field {
            schema,
            optional: false,
        }
    }
}

/// Builder namespace, used as `s.string()`, `s.optional(s.number())`.
#[derive(Clone, Copy, Debug)]
pub struct S;

#[allow(non_upper_case_globals)]
pub const s: S = S;

impl S {
    pub fn any(&self) -> Schema {
        Schema::Any
    }

    pub fn unknown(&self) -> Schema {
        Schema::Unknown
    }

    pub fn null(&self) -> Schema {
        Schema::Literal(LiteralValue::Null)
    }

    pub fn number(&self) -> Schema {
        Schema::Number
    }

    pub fn big_int(&self) -> Schema {
        Schema::BigInt
    }

    pub fn boolean(&self) -> Schema {
        Schema::Boolean
    }

    pub fn string(&self) -> Schema {
        Schema::String { table: None }
    }

    /// A string holding the id of a document in `table`.
    pub fn id(&self, table: &TableName) -> Schema {
        Schema::String {
            table: Some(table.clone()),
        }
    }

    pub fn literal(&self, value: impl Into<LiteralValue>) -> Schema {
        Schema::Literal(value.into())
    }

    pub fn union(&self, members: impl IntoIterator<Item = Schema>) -> Schema {
        Schema::Union(members.into_iter().collect())
    }

    /// An array of `element`s. Arrays are tuples with no fixed elements.
    pub fn array(&self, element: Schema) -> Schema {
        Schema::Tuple {
            elements: vec![],
            rest: Some(Box::new(element)),
        }
    }

    pub fn tuple(&self, elements: impl IntoIterator<Item = Schema>) -> Schema {
        Schema::Tuple {
            elements: elements
                .into_iter()
                .map(|schema| TupleElement {
                    schema,
                    optional: false,
                })
                .collect(),
            rest: None,
        }
    }

    pub fn record(&self, key: Schema, value: Schema) -> Schema {
        Schema::Record {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// An optional struct field, encoded as a union of the field's type and
    /// `undefined`.
    pub fn optional(&self, schema: Schema) -> Field {
        Field {
            schema: Schema::Union(vec![schema, Schema::Undefined]),
            optional: true,
        }
    }

    pub fn object<N: Into<String>>(&self, fields: impl IntoIterator<Item = (N, Field)>) -> Schema {
        Schema::Struct(
            fields
                .into_iter()
                .map(|(name, field)| PropertySignature {
                    name: name.into(),
                    schema: field.schema,
                    optional: field.optional,
                })
                .collect(),
        )
    }

    pub fn trimmed(&self) -> Schema {
        Schema::Transform {
            from: Box::new(self.string()),
            to: Box::new(self.string()),
            kind: TransformKind::Trim,
        }
    }

    pub fn number_from_string(&self) -> Schema {
        Schema::Transform {
            from: Box::new(self.string()),
            to: Box::new(self.number()),
            kind: TransformKind::NumberFromString,
        }
    }
}

impl From<bool> for LiteralValue {
    fn from(b: bool) -> Self {
        LiteralValue::Boolean(b)
    }
}

impl From<f64> for LiteralValue {
    fn from(f: f64) -> Self {
        LiteralValue::Float64(f)
    }
}

impl From<i64> for LiteralValue {
    fn from(i: i64) -> Self {
        LiteralValue::Int64(i)
    }
}

impl From<&str> for LiteralValue {
    fn from(value: &str) -> Self {
        LiteralValue::String(value.to_string())
    }
}

impl From<String> for LiteralValue {
    fn from(value: String) -> Self {
        LiteralValue::String(value)
    }
}

/// Build a struct schema from `name => field` pairs, where each field is a
/// `Schema` or the result of `s.optional(..)`.
#[macro_export]
macro_rules! struct_schema {
    ($($field_name:expr => $field:expr),* $(,)?) => {
        $crate::schema::s.object([
            $(($field_name, $crate::schema::Field::from($field)),)*
        ])
    };
}

fn display_list<T: Display>(
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

impl Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Any => write!(f, "s.any()"),
            Schema::Unknown => write!(f, "s.unknown()"),
            Schema::Literal(LiteralValue::Null) => write!(f, "s.null()"),
            Schema::Literal(literal) => write!(f, "s.literal({literal})"),
            Schema::Union(members) => display_list(f, ["s.union(", ")"], members.iter()),
            Schema::Tuple { elements, rest } => {
                if elements.is_empty()
                    && let Some(rest) = rest
                {
                    return write!(f, "s.array({rest})");
                }
                write!(f, "s.tuple([")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if element.optional {
                        write!(f, "s.optional({})", element.schema)?;
                    } else {
                        write!(f, "{}", element.schema)?;
                    }
                }
                if let Some(rest) = rest {
                    write!(f, ", ...{rest}")?;
                }
                write!(f, "])")
            },
            Schema::Struct(fields) => {
                write!(f, "s.object({{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if field.optional {
                        write!(f, "{}: s.optional({})", field.name, field.schema)?;
                    } else {
                        write!(f, "{}: {}", field.name, field.schema)?;
                    }
                }
                write!(f, "}})")
            },
            Schema::Record { key, value } => write!(f, "s.record({key}, {value})"),
            Schema::Number => write!(f, "s.number()"),
            Schema::BigInt => write!(f, "s.bigInt()"),
            Schema::Boolean => write!(f, "s.boolean()"),
            Schema::String { table: None } => write!(f, "s.string()"),
            Schema::String { table: Some(table) } => write!(f, "s.id(\"{table}\")"),
            Schema::Refinement { from, check } => write!(f, "{from}.{check}"),
            Schema::Transform { from, to, kind } => write!(f, "s.{kind}({from}, {to})"),
            Schema::Undefined => write!(f, "s.undefined()"),
            Schema::Never => write!(f, "s.never()"),
        }
    }
}
