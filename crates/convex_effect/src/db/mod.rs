//! Database access for queries and mutations.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    errors::InvalidId,
    host::{
        DatabaseReaderHost,
        DatabaseWriterHost,
    },
    types::{
        DocumentId,
        TableName,
    },
    value::{
        Object,
        Value,
    },
};

mod expression;
mod index_range;
mod pagination;
mod query;
mod search;

pub use self::{
    expression::{
        Expression,
        FilterBuilder,
        JsonExpression,
    },
    index_range::{
        IndexRange,
        IndexRangeExpression,
        Order,
    },
    pagination::{
        Cursor,
        PaginationOptions,
        PaginationResult,
    },
    query::{
        DocumentDecoder,
        OrderedQuery,
        Query,
        QueryInitializer,
        QuerySource,
        QuerySpec,
        RawDocuments,
    },
    search::SearchFilter,
};

/// Read access to the database, as given to queries and mutations.
#[derive(Clone)]
pub struct DatabaseReader {
    host: Arc<dyn DatabaseReaderHost>,
}

impl DatabaseReader {
    pub fn new(host: Arc<dyn DatabaseReaderHost>) -> Self {
        Self { host }
    }

    /// The document with this id, or `None` if it doesn't exist.
    pub async fn get(&self, id: &DocumentId) -> anyhow::Result<Option<Value>> {
        self.host.get(id).await
    }

    /// Check that `id` is an id for `table`, returning it in normalized
    /// form.
    pub fn normalize_id(&self, table: &TableName, id: &str) -> Result<DocumentId, InvalidId> {
        self.host.normalize_id(table, id).ok_or_else(|| InvalidId {
            table: table.clone(),
            id: id.to_string(),
        })
    }

    /// Start a query over `table`, yielding raw documents.
    pub fn query(&self, table: &TableName) -> QueryInitializer {
        self.query_with(table, RawDocuments)
    }

    pub(crate) fn query_with<D: DocumentDecoder>(
        &self,
        table: &TableName,
        decoder: D,
    ) -> QueryInitializer<D> {
        QueryInitializer::new(self.host.clone(), table.clone(), decoder)
    }
}

/// Read and write access to the database, as given to mutations.
#[derive(Clone)]
pub struct DatabaseWriter {
    host: Arc<dyn DatabaseWriterHost>,
    reader: DatabaseReader,
}

impl DatabaseWriter {
    pub fn new(host: Arc<dyn DatabaseWriterHost>) -> Self {
        let reader = DatabaseReader::new(Arc::new(ReadThrough(host.clone())));
        Self { host, reader }
    }

    /// This writer's read half. Reads observe the writer's own writes.
    pub fn reader(&self) -> &DatabaseReader {
        &self.reader
    }

    pub async fn get(&self, id: &DocumentId) -> anyhow::Result<Option<Value>> {
        self.reader.get(id).await
    }

    pub fn normalize_id(&self, table: &TableName, id: &str) -> Result<DocumentId, InvalidId> {
        self.reader.normalize_id(table, id)
    }

    pub fn query(&self, table: &TableName) -> QueryInitializer {
        self.reader.query(table)
    }

    /// Insert a document of user fields, returning its new id.
    pub async fn insert(&self, table: &TableName, value: Object) -> anyhow::Result<DocumentId> {
        self.host.insert(table, value).await
    }

    /// Shallow merge `value` into an existing document. Fails if the
    /// document doesn't exist.
    pub async fn patch(&self, id: &DocumentId, value: Object) -> anyhow::Result<()> {
        self.host.patch(id, value).await
    }

    /// Replace every user field of an existing document. Fails if the
    /// document doesn't exist.
    pub async fn replace(&self, id: &DocumentId, value: Object) -> anyhow::Result<()> {
        self.host.replace(id, value).await
    }

    /// Delete a document. Deleting a missing document is not an error.
    pub async fn delete(&self, id: &DocumentId) -> anyhow::Result<()> {
        self.host.delete(id).await
    }
}

impl AsRef<DatabaseReader> for DatabaseReader {
    fn as_ref(&self) -> &DatabaseReader {
        self
    }
}

impl AsRef<DatabaseReader> for DatabaseWriter {
    fn as_ref(&self) -> &DatabaseReader {
        &self.reader
    }
}

/// Serves reads from a writer host.
struct ReadThrough(Arc<dyn DatabaseWriterHost>);

#[async_trait]
impl DatabaseReaderHost for ReadThrough {
    async fn get(&self, id: &DocumentId) -> anyhow::Result<Option<Value>> {
        self.0.get(id).await
    }

    fn normalize_id(&self, table: &TableName, id: &str) -> Option<DocumentId> {
        self.0.normalize_id(table, id)
    }

    async fn query(&self, query: &QuerySpec, limit: Option<usize>) -> anyhow::Result<Vec<Value>> {
        self.0.query(query, limit).await
    }

    async fn paginate(
        &self,
        query: &QuerySpec,
        options: &PaginationOptions,
    ) -> anyhow::Result<PaginationResult<Value>> {
        self.0.paginate(query, options).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{
        DatabaseWriter,
        FilterBuilder,
        IndexRange,
        Order,
        QuerySource,
        SearchFilter,
    };
    use crate::{
        definition::{
            SchemaDefinition,
            TableDefinition,
        },
        testing::MockHost,
        types::TableName,
        validator::Validator,
        value::Value,
    };

    async fn seed() -> anyhow::Result<(TableName, Arc<MockHost>, DatabaseWriter)> {
        let table: TableName = "posts".parse()?;
        let schema = SchemaDefinition::new().table(
            TableDefinition::new(table.clone(), Validator::Any)
                .index("by_author_votes", ["author", "votes"])
                .search_index("search_body", "body", ["author"]),
        )?;
        let host = MockHost::new(schema);
        let db = DatabaseWriter::new(host.clone());
        for (author, votes, body) in [
            ("ada", 3.0, "rust is fast"),
            ("bob", 5.0, "fast food"),
            ("ada", 1.0, "slow and steady"),
            ("ada", 8.0, "rust rust rust fast"),
        ] {
            let post = Value::try_from(json!({"author": author, "votes": votes, "body": body}))?;
            db.insert(&table, post.into_object().unwrap_or_default())
                .await?;
        }
        Ok((table, host, db))
    }

    fn votes(documents: Vec<Value>) -> Vec<f64> {
        documents
            .iter()
            .filter_map(|d| d.get_path("votes").and_then(Value::as_f64))
            .collect()
    }

    #[tokio::test]
    async fn test_index_range_order() -> anyhow::Result<()> {
        let (table, _host, db) = seed().await?;
        let by_ada = || {
            db.query(&table)
                .with_index("by_author_votes", IndexRange::all().eq("author", "ada"))
        };
        assert_eq!(votes(by_ada().collect().await??), vec![1.0, 3.0, 8.0]);
        assert_eq!(
            votes(by_ada().order(Order::Desc).take(2).await??),
            vec![8.0, 3.0]
        );

        let popular = db.query(&table).with_index(
            "by_author_votes",
            IndexRange::all().eq("author", "ada").gte("votes", 3.0),
        );
        assert_eq!(votes(popular.collect().await??), vec![3.0, 8.0]);

        let unknown = db.query(&table).with_index("by_title", IndexRange::all());
        assert!(unknown.collect().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_filters_and_search() -> anyhow::Result<()> {
        let (table, _host, db) = seed().await?;
        let q = FilterBuilder;
        let filtered = db
            .query(&table)
            .filter(q.gt(q.field("votes"), q.literal(2.0)));
        assert_eq!(filtered.spec().source, QuerySource::FullTableScan);
        assert_eq!(votes(filtered.collect().await??), vec![3.0, 5.0, 8.0]);

        let searched = db
            .query(&table)
            .with_search_index("search_body", SearchFilter::search("body", "Rust fast"))
            .collect()
            .await??;
        // Both terms match the first and last posts; "fast food" only one.
        assert_eq!(votes(searched), vec![3.0, 8.0, 5.0]);

        let by_author = db
            .query(&table)
            .with_search_index(
                "search_body",
                SearchFilter::search("body", "fast").eq("author", "bob"),
            )
            .collect()
            .await??;
        assert_eq!(votes(by_author), vec![5.0]);
        Ok(())
    }

    #[tokio::test]
    async fn test_normalize_id() -> anyhow::Result<()> {
        let (table, _host, db) = seed().await?;
        let first = db
            .query(&table)
            .first()
            .await??
            .and_then(|d| d.get_path("_id").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        assert_eq!(db.normalize_id(&table, &first)?.as_str(), first);
        let users: TableName = "users".parse()?;
        assert!(db.normalize_id(&users, &first).is_err());
        assert!(db.normalize_id(&table, "not an id").is_err());
        Ok(())
    }
}
