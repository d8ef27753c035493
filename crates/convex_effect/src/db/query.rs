//! The query builder chain.
//!
//! A query starts as a [`QueryInitializer`] for a table. Choosing an index,
//! a search index or an explicit full table scan narrows it to a [`Query`],
//! and choosing an order narrows it to an [`OrderedQuery`]. Every step
//! returns a new value; nothing runs until a terminal (`collect`, `take`,
//! `first`, `unique`, `paginate`) is awaited.

use std::sync::Arc;

use super::{
    expression::Expression,
    index_range::{
        IndexRange,
        Order,
    },
    pagination::{
        PaginationOptions,
        PaginationResult,
    },
    search::SearchFilter,
};
use crate::{
    errors::{
        DocumentCodecError,
        DocumentNotFound,
        DocumentNotUnique,
        EffectError,
    },
    host::DatabaseReaderHost,
    knobs::QUERY_COLLECT_WARN_THRESHOLD,
    types::TableName,
    value::Value,
};

/// Everything the host needs to run a query.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySpec {
    pub table: TableName,
    pub source: QuerySource,
    /// `None` leaves the order to the source: ascending for table scans and
    /// index ranges, relevance for search.
    pub order: Option<Order>,
    /// Applied after the source, all of them must match.
    pub filters: Vec<Expression>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QuerySource {
    FullTableScan,
    Index {
        index_name: String,
        range: IndexRange,
    },
    Search {
        index_name: String,
        filter: SearchFilter,
    },
}

/// Turns documents read by the host into the query's output type.
pub trait DocumentDecoder: Clone + Send + Sync {
    type Output;

    fn decode(
        &self,
        table: &TableName,
        document: Value,
    ) -> anyhow::Result<Result<Self::Output, DocumentCodecError>>;
}

/// Hands documents through as values.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawDocuments;

impl DocumentDecoder for RawDocuments {
    type Output = Value;

    fn decode(
        &self,
        _: &TableName,
        document: Value,
    ) -> anyhow::Result<Result<Value, DocumentCodecError>> {
        Ok(Ok(document))
    }
}

#[derive(Clone)]
struct QueryCore<D> {
    host: Arc<dyn DatabaseReaderHost>,
    spec: QuerySpec,
    decoder: D,
}

impl<D: DocumentDecoder> QueryCore<D> {
    fn decode_all(
        &self,
        documents: Vec<Value>,
    ) -> anyhow::Result<Result<Vec<D::Output>, DocumentCodecError>> {
        let mut decoded = Vec::with_capacity(documents.len());
        for document in documents {
            match self.decoder.decode(&self.spec.table, document)? {
                Ok(document) => decoded.push(document),
                Err(e) => return Ok(Err(e)),
            }
        }
        Ok(Ok(decoded))
    }

    async fn collect(&self) -> anyhow::Result<Result<Vec<D::Output>, DocumentCodecError>> {
        let documents = self.host.query(&self.spec, None).await?;
        if documents.len() > *QUERY_COLLECT_WARN_THRESHOLD {
            tracing::warn!(
                "collect() on `{}` read {} documents. Consider paginating or narrowing the index \
                 range.",
                self.spec.table,
                documents.len()
            );
        }
        self.decode_all(documents)
    }

    async fn take(&self, n: usize) -> anyhow::Result<Result<Vec<D::Output>, DocumentCodecError>> {
        let documents = self.host.query(&self.spec, Some(n)).await?;
        anyhow::ensure!(
            documents.len() <= n,
            "Host returned {} documents for take({n})",
            documents.len()
        );
        self.decode_all(documents)
    }

    async fn first(&self) -> anyhow::Result<Result<Option<D::Output>, DocumentCodecError>> {
        let mut documents = match self.take(1).await? {
            Ok(documents) => documents,
            Err(e) => return Ok(Err(e)),
        };
        Ok(Ok(documents.pop()))
    }

    async fn unique(&self) -> anyhow::Result<Result<Option<D::Output>, EffectError>> {
        // Reading two is enough to tell "none", "one" and "more than one"
        // apart without scanning the rest of the range.
        let mut documents = match self.take(2).await? {
            Ok(documents) => documents,
            Err(e) => return Ok(Err(e.into())),
        };
        if documents.len() > 1 {
            return Ok(Err(DocumentNotUnique {
                table: self.spec.table.clone(),
            }
            .into()));
        }
        Ok(Ok(documents.pop()))
    }

    fn not_found(&self) -> EffectError {
        DocumentNotFound {
            table: self.spec.table.clone(),
            id: None,
        }
        .into()
    }

    async fn paginate(
        &self,
        options: &PaginationOptions,
    ) -> anyhow::Result<Result<PaginationResult<D::Output>, DocumentCodecError>> {
        let PaginationResult {
            page,
            is_done,
            continue_cursor,
        } = self.host.paginate(&self.spec, options).await?;
        let page = match self.decode_all(page)? {
            Ok(page) => page,
            Err(e) => return Ok(Err(e)),
        };
        Ok(Ok(PaginationResult {
            page,
            is_done,
            continue_cursor,
        }))
    }
}

macro_rules! query_terminals {
    ($ty:ident) => {
        impl<D: DocumentDecoder> $ty<D> {
            /// The query as sent to the host.
            pub fn spec(&self) -> &QuerySpec {
                &self.0.spec
            }

            /// Read every matching document. Use `take` or `paginate` when
            /// the result set isn't known to be small.
            pub async fn collect(
                &self,
            ) -> anyhow::Result<Result<Vec<D::Output>, DocumentCodecError>> {
                self.0.collect().await
            }

            pub async fn take(
                &self,
                n: usize,
            ) -> anyhow::Result<Result<Vec<D::Output>, DocumentCodecError>> {
                self.0.take(n).await
            }

            pub async fn first(
                &self,
            ) -> anyhow::Result<Result<Option<D::Output>, DocumentCodecError>> {
                self.0.first().await
            }

            /// Like `first`, failing with `DocumentNotFound` when nothing
            /// matches.
            pub async fn first_or_fail(&self) -> anyhow::Result<Result<D::Output, EffectError>> {
                Ok(match self.0.first().await? {
                    Ok(Some(document)) => Ok(document),
                    Ok(None) => Err(self.0.not_found()),
                    Err(e) => Err(e.into()),
                })
            }

            /// The single matching document, or `None` if nothing matches.
            /// Fails with `DocumentNotUnique` if two or more match.
            pub async fn unique(&self) -> anyhow::Result<Result<Option<D::Output>, EffectError>> {
                self.0.unique().await
            }

            /// Like `unique`, failing with `DocumentNotFound` when nothing
            /// matches.
            pub async fn unique_or_fail(&self) -> anyhow::Result<Result<D::Output, EffectError>> {
                Ok(match self.0.unique().await? {
                    Ok(Some(document)) => Ok(document),
                    Ok(None) => Err(self.0.not_found()),
                    Err(e) => Err(e),
                })
            }

            /// Read one page. The cursor in `options` must come from an
            /// earlier page of the same query.
            pub async fn paginate(
                &self,
                options: &PaginationOptions,
            ) -> anyhow::Result<Result<PaginationResult<D::Output>, DocumentCodecError>> {
                self.0.paginate(options).await
            }
        }
    };
}

/// A query that hasn't picked an index or order yet.
#[derive(Clone)]
pub struct QueryInitializer<D = RawDocuments>(QueryCore<D>);

/// A query reading from a chosen source.
#[derive(Clone)]
pub struct Query<D = RawDocuments>(QueryCore<D>);

/// A query with its order fixed. Only terminals remain.
#[derive(Clone)]
pub struct OrderedQuery<D = RawDocuments>(QueryCore<D>);

query_terminals!(QueryInitializer);
query_terminals!(Query);
query_terminals!(OrderedQuery);

impl<D: DocumentDecoder> QueryInitializer<D> {
    pub(crate) fn new(host: Arc<dyn DatabaseReaderHost>, table: TableName, decoder: D) -> Self {
        Self(QueryCore {
            host,
            spec: QuerySpec {
                table,
                source: QuerySource::FullTableScan,
                order: None,
                filters: vec![],
            },
            decoder,
        })
    }

    /// Read the whole table in creation order.
    pub fn full_table_scan(self) -> Query<D> {
        Query(self.0)
    }

    /// Read the part of `index_name` selected by `range`.
    pub fn with_index(mut self, index_name: impl Into<String>, range: IndexRange) -> Query<D> {
        self.0.spec.source = QuerySource::Index {
            index_name: index_name.into(),
            range,
        };
        Query(self.0)
    }

    /// Run a full text search. Results come back in relevance order.
    pub fn with_search_index(
        mut self,
        index_name: impl Into<String>,
        filter: SearchFilter,
    ) -> OrderedQuery<D> {
        self.0.spec.source = QuerySource::Search {
            index_name: index_name.into(),
            filter,
        };
        OrderedQuery(self.0)
    }

    pub fn filter(self, expression: Expression) -> Query<D> {
        self.full_table_scan().filter(expression)
    }

    pub fn order(self, order: Order) -> OrderedQuery<D> {
        self.full_table_scan().order(order)
    }
}

impl<D: DocumentDecoder> Query<D> {
    pub fn filter(mut self, expression: Expression) -> Query<D> {
        self.0.spec.filters.push(expression);
        self
    }

    pub fn order(mut self, order: Order) -> OrderedQuery<D> {
        self.0.spec.order = Some(order);
        OrderedQuery(self.0)
    }
}
