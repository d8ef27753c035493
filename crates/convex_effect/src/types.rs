//! Identifiers handed out by the host.

use std::str::FromStr;

use derive_more::Display;
use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::SchemaError;

const MAX_TABLE_NAME_LENGTH: usize = 64;

/// The name of a user table.
#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check_table_name(name: &str) -> Result<(), &'static str> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("table names cannot be empty");
    };
    if first == '_' {
        return Err("table names cannot start with an underscore");
    }
    if !first.is_ascii_alphabetic() {
        return Err("table names must start with a letter");
    }
    if name.len() > MAX_TABLE_NAME_LENGTH {
        return Err("table names must be at most 64 characters");
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("table names may only contain alphanumeric characters or underscores");
    }
    Ok(())
}

impl FromStr for TableName {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_table_name(s).map_err(|reason| SchemaError::InvalidTableName {
            name: s.to_string(),
            reason: reason.to_string(),
        })?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for TableName {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TableName> for String {
    fn from(t: TableName) -> Self {
        t.0
    }
}

macro_rules! host_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }
    };
}

host_id!(
    /// An opaque document identifier. Only the host knows how to interpret
    /// it; use `DatabaseReader::normalize_id` to check untrusted strings.
    DocumentId
);
host_id!(
    /// Identifies a file in file storage.
    StorageId
);
host_id!(
    /// Identifies a scheduled function invocation.
    ScheduledFunctionId
);
