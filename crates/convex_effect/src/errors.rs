//! Failure types.
//!
//! Operations in this crate return `anyhow::Result<Result<T, E>>`. The outer
//! `anyhow::Error` is fatal: a host fault, or a broken internal invariant
//! such as a document vanishing between a write and its re-read. The inner
//! `E` is a tagged, recoverable failure that callers are expected to match
//! on. Tags are short ScreamingCamelCase strings that stay stable when
//! messages change.

use std::{
    borrow::Cow,
    fmt,
};

use serde::Serialize;

use crate::{
    schema::ParseIssue,
    types::{
        DocumentId,
        StorageId,
        TableName,
    },
    value::Value,
};

/// A recoverable failure with a stable tag.
pub trait TaggedFailure: fmt::Display {
    fn tag(&self) -> &'static str;

    /// Structured payload sent along with the failure when it escapes a
    /// registered function.
    fn data(&self) -> Option<Value> {
        None
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("{}", not_found_message(.table, .id.as_ref()))]
pub struct DocumentNotFound {
    pub table: TableName,
    /// `None` when the lookup was a query rather than a get by id.
    pub id: Option<DocumentId>,
}

fn not_found_message(table: &TableName, id: Option<&DocumentId>) -> String {
    match id {
        Some(id) => format!("Document \"{id}\" not found in table `{table}`"),
        None => format!("No document in table `{table}` matched the query"),
    }
}

impl TaggedFailure for DocumentNotFound {
    fn tag(&self) -> &'static str {
        "DocumentNotFound"
    }

    fn data(&self) -> Option<Value> {
        Some(match &self.id {
            Some(id) => failure_data([("table", self.table.as_str()), ("id", id.as_str())]),
            None => failure_data([("table", self.table.as_str())]),
        })
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("Expected at most one document in table `{table}` to match the query")]
pub struct DocumentNotUnique {
    pub table: TableName,
}

impl TaggedFailure for DocumentNotUnique {
    fn tag(&self) -> &'static str {
        "DocumentNotUnique"
    }

    fn data(&self) -> Option<Value> {
        Some(failure_data([("table", self.table.as_str())]))
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("\"{id}\" is not a valid ID for table `{table}`")]
pub struct InvalidId {
    pub table: TableName,
    pub id: String,
}

impl TaggedFailure for InvalidId {
    fn tag(&self) -> &'static str {
        "InvalidId"
    }

    fn data(&self) -> Option<Value> {
        Some(failure_data([
            ("table", self.table.as_str()),
            ("id", self.id.as_str()),
        ]))
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("File \"{id}\" not found")]
pub struct FileNotFound {
    pub id: StorageId,
}

impl TaggedFailure for FileNotFound {
    fn tag(&self) -> &'static str {
        "FileNotFound"
    }

    fn data(&self) -> Option<Value> {
        Some(failure_data([("id", self.id.as_str())]))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CodecDirection {
    Decode,
    Encode,
}

impl fmt::Display for CodecDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecDirection::Decode => write!(f, "decode"),
            CodecDirection::Encode => write!(f, "encode"),
        }
    }
}

/// A document didn't match its model's schema, either coming out of the
/// database (decode) or going in (encode).
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("Failed to {direction} document for table `{table}`: {issue}")]
pub struct DocumentCodecError {
    pub table: TableName,
    pub direction: CodecDirection,
    pub issue: ParseIssue,
}

impl DocumentCodecError {
    pub fn decode(table: &TableName, issue: ParseIssue) -> Self {
        Self {
            table: table.clone(),
            direction: CodecDirection::Decode,
            issue,
        }
    }

    pub fn encode(table: &TableName, issue: ParseIssue) -> Self {
        Self {
            table: table.clone(),
            direction: CodecDirection::Encode,
            issue,
        }
    }
}

impl TaggedFailure for DocumentCodecError {
    fn tag(&self) -> &'static str {
        match self.direction {
            CodecDirection::Decode => "DocumentDecodeError",
            CodecDirection::Encode => "DocumentEncodeError",
        }
    }

    fn data(&self) -> Option<Value> {
        let path = self.issue.path().to_string();
        Some(failure_data([
            ("table", self.table.as_str()),
            ("path", path.as_str()),
        ]))
    }
}

/// Union of the tagged failures, for operations that can fail in more than
/// one way.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum EffectError {
    #[error(transparent)]
    DocumentNotFound(#[from] DocumentNotFound),
    #[error(transparent)]
    DocumentNotUnique(#[from] DocumentNotUnique),
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    FileNotFound(#[from] FileNotFound),
    #[error(transparent)]
    DocumentCodec(#[from] DocumentCodecError),
}

impl TaggedFailure for EffectError {
    fn tag(&self) -> &'static str {
        match self {
            EffectError::DocumentNotFound(e) => e.tag(),
            EffectError::DocumentNotUnique(e) => e.tag(),
            EffectError::InvalidId(e) => e.tag(),
            EffectError::FileNotFound(e) => e.tag(),
            EffectError::DocumentCodec(e) => e.tag(),
        }
    }

    fn data(&self) -> Option<Value> {
        match self {
            EffectError::DocumentNotFound(e) => e.data(),
            EffectError::DocumentNotUnique(e) => e.data(),
            EffectError::InvalidId(e) => e.data(),
            EffectError::FileNotFound(e) => e.data(),
            EffectError::DocumentCodec(e) => e.data(),
        }
    }
}

fn failure_data<const N: usize>(fields: [(&str, &str); N]) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::from(v)))
            .collect(),
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Raised by handler code through its typed failure channel.
    Application,
    /// The caller sent arguments that didn't validate.
    BadRequest,
}

/// The host-facing form of a typed failure that escaped a registered
/// function. It travels through `anyhow::Error` so the host sees an ordinary
/// failure, and can be recovered with [`FunctionFailureAnyhowExt`].
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("{message}")]
pub struct FunctionFailure {
    pub kind: FailureKind,
    /// short ScreamingCamelCase, eg DocumentNotFound
    pub tag: Cow<'static, str>,
    pub message: String,
    pub data: Option<Value>,
}

impl FunctionFailure {
    pub fn application(tag: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Application,
            tag: tag.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn bad_request(tag: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::BadRequest,
            tag: tag.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl<E: TaggedFailure> From<E> for FunctionFailure {
    fn from(e: E) -> Self {
        Self {
            kind: FailureKind::Application,
            tag: Cow::Borrowed(e.tag()),
            message: e.to_string(),
            data: e.data(),
        }
    }
}

pub trait FunctionFailureAnyhowExt {
    fn function_failure(&self) -> Option<&FunctionFailure>;
    fn failure_tag(&self) -> Option<&str>;
    fn is_bad_request(&self) -> bool;
}

impl FunctionFailureAnyhowExt for anyhow::Error {
    fn function_failure(&self) -> Option<&FunctionFailure> {
        self.downcast_ref::<FunctionFailure>()
    }

    fn failure_tag(&self) -> Option<&str> {
        self.function_failure().map(|f| &*f.tag)
    }

    fn is_bad_request(&self) -> bool {
        self.function_failure()
            .is_some_and(|f| f.kind == FailureKind::BadRequest)
    }
}

/// Raised through the fatal channel when the host breaks an invariant the
/// adapters rely on.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("Internal consistency fault: {0}")]
pub struct ConsistencyFault(pub String);

/// Programmer errors in schemas, models and registrations. These surface at
/// setup time, never while a function runs.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum SchemaError {
    #[error("Tuple element {index} is optional, which has no validator equivalent")]
    OptionalTupleElement { index: usize },
    #[error("Record keys must be plain strings, found {key}")]
    NonStringRecordKey { key: String },
    #[error("Schemas of kind `{kind}` cannot be expressed as a validator")]
    UnsupportedKind { kind: &'static str },
    #[error("Unions must have at least one member")]
    EmptyUnion,
    #[error("Tuples must have at least one element")]
    EmptyTuple,
    #[error("Field `{field}` is declared more than once")]
    DuplicateField { field: String },
    #[error("{context} must be a struct schema")]
    NotAStruct { context: &'static str },
    #[error("Field `{field}` is a system field and can't be declared")]
    ReservedField { field: String },
    #[error("Invalid table name \"{name}\": {reason}")]
    InvalidTableName { name: String, reason: String },
    #[error("Invalid index `{table}.{index}`: {reason}")]
    InvalidIndex {
        table: TableName,
        index: String,
        reason: String,
    },
    #[error("Table `{table}` is defined more than once")]
    DuplicateTable { table: TableName },
    #[error("Invalid function path \"{path}\": {reason}")]
    InvalidFunctionPath { path: String, reason: String },
    #[error("Function `{path}` is registered more than once")]
    DuplicateFunction { path: String },
    #[error("Invalid HTTP route `{route}`: {reason}")]
    InvalidRoute { route: String, reason: String },
}

/// Unwrap the typed layer of a result inside a handler, returning the
/// failure (converted with `Into`) through the typed channel.
///
/// ```ignore
/// let doc = try_typed!(messages.get_by_id(ctx.db(), &id).await?);
/// ```
#[macro_export]
macro_rules! try_typed {
    ($e:expr) => {
        match $e {
            ::std::result::Result::Ok(v) => v,
            ::std::result::Result::Err(e) => {
                return ::std::result::Result::Ok(::std::result::Result::Err(e.into()))
            },
        }
    };
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{
        DocumentNotFound,
        EffectError,
        FunctionFailure,
        FunctionFailureAnyhowExt,
        TaggedFailure,
    };
    use crate::value::Value;

    fn not_found() -> anyhow::Result<DocumentNotFound> {
        Ok(DocumentNotFound {
            table: "messages".parse()?,
            id: Some("messages:1".into()),
        })
    }

    #[test]
    fn test_tags_survive_conversion() -> anyhow::Result<()> {
        let err = EffectError::from(not_found()?);
        assert_eq!(err.tag(), "DocumentNotFound");
        let failure = FunctionFailure::from(err);
        assert_eq!(failure.tag, "DocumentNotFound");
        let data = failure.data.clone().context("missing data")?;
        assert_eq!(data.get_path("id"), Some(&Value::from("messages:1")));

        let raised = anyhow::Error::new(failure);
        assert_eq!(raised.failure_tag(), Some("DocumentNotFound"));
        assert!(!raised.is_bad_request());
        Ok(())
    }

    fn lookup(found: bool) -> anyhow::Result<Result<u32, EffectError>> {
        let inner: Result<u32, DocumentNotFound> = if found { Ok(7) } else { Err(not_found()?) };
        let value = try_typed!(inner);
        Ok(Ok(value + 1))
    }

    #[test]
    fn test_try_typed() -> anyhow::Result<()> {
        assert_eq!(lookup(true)?, Ok(8));
        assert!(matches!(lookup(false)?, Err(EffectError::DocumentNotFound(_))));
        Ok(())
    }
}
