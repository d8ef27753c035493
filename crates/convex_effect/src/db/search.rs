//! Full text search filters.

use serde::Serialize;

use crate::value::Value;

/// `SearchFilter::search("body", "hello world").eq("channel", id)`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilter {
    pub search_field: String,
    pub query: String,
    pub filters: Vec<(String, Value)>,
}

impl SearchFilter {
    pub fn search(search_field: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            search_field: search_field.into(),
            query: query.into(),
            filters: vec![],
        }
    }

    pub fn eq(mut self, field_path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field_path.into(), value.into()));
        self
    }

    /// The query's search terms, lowercased.
    pub fn terms(&self) -> Vec<String> {
        self.query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect()
    }
}
