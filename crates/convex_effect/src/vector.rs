//! Vector search, available to actions.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    types::DocumentId,
    value::Value,
};

pub const DEFAULT_VECTOR_SEARCH_LIMIT: usize = 10;
pub const MAX_VECTOR_SEARCH_LIMIT: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchQuery {
    pub vector: Vec<f64>,
    /// Between 1 and [`MAX_VECTOR_SEARCH_LIMIT`], defaulting to
    /// [`DEFAULT_VECTOR_SEARCH_LIMIT`].
    pub limit: Option<usize>,
    /// Documents must have one of these `(field, value)` pairs. Every field
    /// must be a filter field of the index. Empty matches everything.
    pub filter: Vec<(String, Value)>,
}

impl VectorSearchQuery {
    pub fn new(vector: Vec<f64>) -> Self {
        Self {
            vector,
            limit: None,
            filter: vec![],
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn or_eq(mut self, field_path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.push((field_path.into(), value.into()));
        self
    }

    pub fn resolved_limit(&self) -> anyhow::Result<usize> {
        let limit = self.limit.unwrap_or(DEFAULT_VECTOR_SEARCH_LIMIT);
        anyhow::ensure!(
            (1..=MAX_VECTOR_SEARCH_LIMIT).contains(&limit),
            "Vector search limit must be between 1 and {MAX_VECTOR_SEARCH_LIMIT}, got {limit}"
        );
        Ok(limit)
    }
}

/// One hit, best first. Scores are cosine similarities in `[-1, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(rename = "_score")]
    pub score: f64,
}
