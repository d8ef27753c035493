use serde::{
    Deserialize,
    Serialize,
};

/// A position in a paginated query. Cursors come from the host and are
/// handed back to it untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a token produced by a host implementation.
    pub fn from_host_token(token: String) -> Self {
        Self(token)
    }

    /// The token to hand back to the host implementation.
    pub fn host_token(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationOptions {
    pub num_items: usize,
    /// `None` starts from the beginning.
    pub cursor: Option<Cursor>,
}

impl PaginationOptions {
    pub fn first(num_items: usize) -> Self {
        Self {
            num_items,
            cursor: None,
        }
    }

    pub fn after(num_items: usize, cursor: Cursor) -> Self {
        Self {
            num_items,
            cursor: Some(cursor),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationResult<T> {
    pub page: Vec<T>,
    pub is_done: bool,
    pub continue_cursor: Cursor,
}
