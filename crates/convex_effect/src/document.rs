use serde::{
    Deserialize,
    Serialize,
};

use crate::types::DocumentId;

pub const ID_FIELD: &str = "_id";
pub const CREATION_TIME_FIELD: &str = "_creationTime";

/// A stored document: the user's fields plus the two system fields the
/// host attaches on insert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document<T> {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "_creationTime")]
    pub creation_time: f64,
    #[serde(flatten)]
    pub fields: T,
}

/// Whether `field` is reserved for system use. User schemas can't declare
/// these.
pub fn is_system_field(field: &str) -> bool {
    field.starts_with('_')
}
