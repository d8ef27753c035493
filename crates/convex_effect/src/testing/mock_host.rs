//! An in-memory host for unit tests.
//!
//! `MockHost` implements every host trait over a single shared state, so a
//! test can insert through a mutation context and read the result back
//! through a query context. Queries honor the indexes declared in the
//! [`SchemaDefinition`] it was built with.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        Weak,
    },
    time::{
        Duration,
        SystemTime,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{
    Digest,
    Sha256,
};

use crate::{
    auth::UserIdentity,
    db::{
        Cursor,
        IndexRange,
        Order,
        PaginationOptions,
        PaginationResult,
        QuerySource,
        QuerySpec,
        SearchFilter,
    },
    definition::{
        SchemaDefinition,
        system_index_fields,
    },
    document::{
        CREATION_TIME_FIELD,
        ID_FIELD,
        is_system_field,
    },
    functions::{
        FunctionReference,
        FunctionRegistry,
    },
    host::{
        ActionHost,
        AuthHost,
        DatabaseReaderHost,
        DatabaseWriterHost,
        NativeActionCtx,
        NativeMutationCtx,
        NativeQueryCtx,
        SchedulerHost,
        StorageActionHost,
        StorageReaderHost,
        StorageWriterHost,
    },
    storage::FileMetadata,
    types::{
        DocumentId,
        ScheduledFunctionId,
        StorageId,
        TableName,
    },
    value::{
        Object,
        Value,
    },
    vector::{
        VectorSearchQuery,
        VectorSearchResult,
    },
};

const CURSOR_PREFIX: &str = "mock-cursor:";
const STORAGE_URL: &str = "https://mock.convex.cloud/api/storage";

/// The clock starts here and ticks one millisecond per insert, so creation
/// times are distinct and increasing.
const START_TIME_MS: f64 = 1_700_000_000_000.0;

#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledCall {
    pub id: ScheduledFunctionId,
    pub function: FunctionReference,
    pub args: Value,
    pub run_at: SystemTime,
    pub canceled: bool,
}

#[derive(Clone, Debug)]
struct StoredFile {
    blob: Bytes,
    metadata: FileMetadata,
}

#[derive(Clone, Debug)]
struct MockState {
    /// Documents keyed by their sequence number, so iteration is in
    /// creation order.
    tables: BTreeMap<TableName, BTreeMap<u64, Value>>,
    next_id: u64,
    clock: f64,
    files: BTreeMap<StorageId, StoredFile>,
    next_file: u64,
    scheduled: Vec<ScheduledCall>,
    identity: Option<UserIdentity>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            next_id: 1,
            clock: START_TIME_MS,
            files: BTreeMap::new(),
            next_file: 1,
            scheduled: vec![],
            identity: None,
        }
    }
}

pub struct MockHost {
    this: Weak<MockHost>,
    schema: SchemaDefinition,
    registry: Option<FunctionRegistry>,
    state: Mutex<MockState>,
}

impl MockHost {
    pub fn new(schema: SchemaDefinition) -> Arc<Self> {
        Self::build(schema, None)
    }

    /// A host that can serve `run_query`, `run_mutation` and `run_action`
    /// from `registry`.
    pub fn with_registry(schema: SchemaDefinition, registry: FunctionRegistry) -> Arc<Self> {
        Self::build(schema, Some(registry))
    }

    fn build(schema: SchemaDefinition, registry: Option<FunctionRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|this| MockHost {
            this: this.clone(),
            schema,
            registry,
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn query_ctx(self: &Arc<Self>) -> NativeQueryCtx {
        NativeQueryCtx {
            db: self.clone(),
            auth: self.clone(),
            storage: self.clone(),
        }
    }

    pub fn mutation_ctx(self: &Arc<Self>) -> NativeMutationCtx {
        NativeMutationCtx {
            db: self.clone(),
            auth: self.clone(),
            storage: self.clone(),
            scheduler: self.clone(),
        }
    }

    pub fn action_ctx(self: &Arc<Self>) -> NativeActionCtx {
        NativeActionCtx {
            auth: self.clone(),
            storage: self.clone(),
            scheduler: self.clone(),
            runner: self.clone(),
        }
    }

    pub fn set_identity(&self, identity: Option<UserIdentity>) {
        self.state.lock().identity = identity;
    }

    /// Every document in `table`, in creation order.
    pub fn documents(&self, table: &TableName) -> Vec<Value> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn scheduled(&self) -> Vec<ScheduledCall> {
        self.state.lock().scheduled.clone()
    }

    fn arc(&self) -> anyhow::Result<Arc<MockHost>> {
        self.this.upgrade().context("MockHost was dropped")
    }

    fn registry(&self) -> anyhow::Result<&FunctionRegistry> {
        self.registry
            .as_ref()
            .context("MockHost was built without a function registry")
    }

    fn run_query_spec(&self, query: &QuerySpec) -> anyhow::Result<Vec<Value>> {
        let candidates: Vec<Value> = self.documents(&query.table);
        let mut documents = match &query.source {
            QuerySource::FullTableScan => candidates,
            QuerySource::Index { index_name, range } => {
                self.index_range(query, index_name, range, candidates)?
            },
            QuerySource::Search { index_name, filter } => {
                self.search(query, index_name, filter, candidates)?
            },
        };
        // Search results are always in relevance order.
        let is_search = matches!(query.source, QuerySource::Search { .. });
        if query.order == Some(Order::Desc) && !is_search {
            documents.reverse();
        }
        let mut matching = Vec::with_capacity(documents.len());
        'documents: for document in documents {
            for filter in &query.filters {
                if !filter.matches(&document)? {
                    continue 'documents;
                }
            }
            matching.push(document);
        }
        Ok(matching)
    }

    fn index_range(
        &self,
        query: &QuerySpec,
        index_name: &str,
        range: &IndexRange,
        candidates: Vec<Value>,
    ) -> anyhow::Result<Vec<Value>> {
        let fields = self
            .schema
            .get(&query.table)
            .and_then(|table| table.index_fields(index_name))
            .or_else(|| system_index_fields(index_name))
            .with_context(|| format!("Index `{}.{index_name}` not found", query.table))?;
        range
            .check_against(&fields)
            .with_context(|| format!("Invalid range for index `{}.{index_name}`", query.table))?;
        let mut documents: Vec<Value> = candidates
            .into_iter()
            .filter(|document| {
                range.expressions().iter().all(|expression| {
                    document
                        .get_path(expression.field_path())
                        .is_some_and(|value| expression.admits(value))
                })
            })
            .collect();
        let key = |document: &Value| -> Vec<Option<Value>> {
            fields
                .iter()
                .map(|field| document.get_path(field).cloned())
                .collect()
        };
        documents.sort_by_key(key);
        Ok(documents)
    }

    fn search(
        &self,
        query: &QuerySpec,
        index_name: &str,
        filter: &SearchFilter,
        candidates: Vec<Value>,
    ) -> anyhow::Result<Vec<Value>> {
        let index = self
            .schema
            .get(&query.table)
            .and_then(|table| table.search_index_definition(index_name))
            .with_context(|| format!("Search index `{}.{index_name}` not found", query.table))?;
        anyhow::ensure!(
            index.search_field == filter.search_field,
            "Search index `{index_name}` searches `{}`, not `{}`",
            index.search_field,
            filter.search_field
        );
        for (field, _) in &filter.filters {
            anyhow::ensure!(
                index.filter_fields.contains(field),
                "`{field}` is not a filter field of search index `{index_name}`"
            );
        }
        let terms = filter.terms();
        let mut scored: Vec<(usize, Value)> = candidates
            .into_iter()
            .filter(|document| {
                filter
                    .filters
                    .iter()
                    .all(|(field, value)| document.get_path(field) == Some(value))
            })
            .filter_map(|document| {
                let text = document.get_path(&filter.search_field)?.as_str()?;
                let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
                let score = terms.iter().filter(|t| words.contains(t)).count();
                (score > 0).then_some((score, document))
            })
            .collect();
        // Stable, so ties stay in creation order.
        scored.sort_by(|(a, _), (b, _)| b.cmp(a));
        Ok(scored.into_iter().map(|(_, document)| document).collect())
    }

    fn sequence_number(id: &DocumentId) -> Option<(TableName, u64)> {
        let (table, n) = id.as_str().split_once(':')?;
        Some((table.parse().ok()?, n.parse().ok()?))
    }

    fn update_document(
        &self,
        id: &DocumentId,
        update: impl FnOnce(&mut Object),
    ) -> anyhow::Result<()> {
        let (table, n) = Self::sequence_number(id).with_context(|| format!("Invalid id {id}"))?;
        let mut state = self.state.lock();
        let document = state
            .tables
            .get_mut(&table)
            .and_then(|documents| documents.get_mut(&n))
            .with_context(|| format!("Document {id} not found"))?;
        let Value::Object(fields) = document else {
            anyhow::bail!("Document {id} is not an object");
        };
        let mut updated = fields.clone();
        update(&mut updated);
        let user_fields = updated
            .iter()
            .filter(|(field, _)| !is_system_field(field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        self.check_document(&table, &user_fields)?;
        *fields = updated;
        Ok(())
    }

    fn check_document(&self, table: &TableName, fields: &Object) -> anyhow::Result<()> {
        if let Some(system_field) = fields.keys().find(|field| is_system_field(field)) {
            anyhow::bail!("`{system_field}` is a system field and can't be written");
        }
        if let Some(definition) = self.schema.get(table) {
            definition
                .document_type()
                .check_value(&Value::Object(fields.clone()))
                .with_context(|| format!("Document doesn't match the schema of `{table}`"))?;
        }
        Ok(())
    }

    fn file(&self, id: &StorageId) -> Option<StoredFile> {
        self.state.lock().files.get(id).cloned()
    }

    fn schedule(
        &self,
        run_at: SystemTime,
        function: &FunctionReference,
        args: Value,
    ) -> ScheduledFunctionId {
        let mut state = self.state.lock();
        let id = ScheduledFunctionId::new(format!("_scheduled_functions:{}", state.next_id));
        state.next_id += 1;
        state.scheduled.push(ScheduledCall {
            id: id.clone(),
            function: function.clone(),
            args,
            run_at,
            canceled: false,
        });
        id
    }
}

fn parse_cursor(cursor: Option<&Cursor>) -> anyhow::Result<usize> {
    let Some(cursor) = cursor else {
        return Ok(0);
    };
    let offset = cursor
        .host_token()
        .strip_prefix(CURSOR_PREFIX)
        .with_context(|| format!("Invalid cursor {:?}", cursor.host_token()))?;
    Ok(offset.parse()?)
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(a, b)| a * b).sum();
    let norm = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>().sqrt();
    let denominator = norm(a) * norm(b);
    if denominator == 0.0 {
        return 0.0;
    }
    dot / denominator
}

#[async_trait]
impl DatabaseReaderHost for MockHost {
    async fn get(&self, id: &DocumentId) -> anyhow::Result<Option<Value>> {
        let Some((table, n)) = Self::sequence_number(id) else {
            return Ok(None);
        };
        Ok(self
            .state
            .lock()
            .tables
            .get(&table)
            .and_then(|documents| documents.get(&n))
            .cloned())
    }

    fn normalize_id(&self, table: &TableName, id: &str) -> Option<DocumentId> {
        let id = DocumentId::new(id);
        let (id_table, _) = Self::sequence_number(&id)?;
        (id_table == *table).then_some(id)
    }

    async fn query(&self, query: &QuerySpec, limit: Option<usize>) -> anyhow::Result<Vec<Value>> {
        let mut documents = self.run_query_spec(query)?;
        if let Some(limit) = limit {
            documents.truncate(limit);
        }
        Ok(documents)
    }

    async fn paginate(
        &self,
        query: &QuerySpec,
        options: &PaginationOptions,
    ) -> anyhow::Result<PaginationResult<Value>> {
        let documents = self.run_query_spec(query)?;
        let start = parse_cursor(options.cursor.as_ref())?.min(documents.len());
        let end = start.saturating_add(options.num_items).min(documents.len());
        Ok(PaginationResult {
            page: documents[start..end].to_vec(),
            is_done: end == documents.len(),
            continue_cursor: Cursor::from_host_token(format!("{CURSOR_PREFIX}{end}")),
        })
    }
}

#[async_trait]
impl DatabaseWriterHost for MockHost {
    async fn insert(&self, table: &TableName, value: Object) -> anyhow::Result<DocumentId> {
        self.check_document(table, &value)?;
        let mut state = self.state.lock();
        let n = state.next_id;
        state.next_id += 1;
        state.clock += 1.0;
        let id = DocumentId::new(format!("{table}:{n}"));
        let mut document = value;
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        document.insert(CREATION_TIME_FIELD.to_string(), Value::Float64(state.clock));
        state
            .tables
            .entry(table.clone())
            .or_default()
            .insert(n, Value::Object(document));
        Ok(id)
    }

    async fn patch(&self, id: &DocumentId, value: Object) -> anyhow::Result<()> {
        if let Some(system_field) = value.keys().find(|field| is_system_field(field)) {
            anyhow::bail!("`{system_field}` is a system field and can't be written");
        }
        self.update_document(id, |fields| fields.extend(value))
    }

    async fn replace(&self, id: &DocumentId, value: Object) -> anyhow::Result<()> {
        if let Some(system_field) = value.keys().find(|field| is_system_field(field)) {
            anyhow::bail!("`{system_field}` is a system field and can't be written");
        }
        self.update_document(id, |fields| {
            fields.retain(|field, _| is_system_field(field));
            fields.extend(value);
        })
    }

    async fn delete(&self, id: &DocumentId) -> anyhow::Result<()> {
        if let Some((table, n)) = Self::sequence_number(id)
            && let Some(documents) = self.state.lock().tables.get_mut(&table)
        {
            documents.remove(&n);
        }
        Ok(())
    }
}

#[async_trait]
impl AuthHost for MockHost {
    async fn get_user_identity(&self) -> anyhow::Result<Option<UserIdentity>> {
        Ok(self.state.lock().identity.clone())
    }
}

#[async_trait]
impl StorageReaderHost for MockHost {
    async fn get_url(&self, id: &StorageId) -> anyhow::Result<Option<String>> {
        Ok(self.file(id).map(|_| format!("{STORAGE_URL}/{id}")))
    }

    async fn get_metadata(&self, id: &StorageId) -> anyhow::Result<Option<FileMetadata>> {
        Ok(self.file(id).map(|file| file.metadata))
    }
}

#[async_trait]
impl StorageWriterHost for MockHost {
    async fn generate_upload_url(&self) -> anyhow::Result<String> {
        let mut state = self.state.lock();
        let token = state.next_file;
        state.next_file += 1;
        Ok(format!("{STORAGE_URL}/upload?token={token}"))
    }

    async fn delete(&self, id: &StorageId) -> anyhow::Result<()> {
        self.state.lock().files.remove(id);
        Ok(())
    }
}

#[async_trait]
impl StorageActionHost for MockHost {
    async fn get(&self, id: &StorageId) -> anyhow::Result<Option<Bytes>> {
        Ok(self.file(id).map(|file| file.blob))
    }

    async fn store(&self, blob: Bytes, content_type: Option<String>) -> anyhow::Result<StorageId> {
        let sha256 = base64::encode(Sha256::digest(&blob));
        let mut state = self.state.lock();
        let storage_id = StorageId::new(format!("file-{}", state.next_file));
        state.next_file += 1;
        let metadata = FileMetadata {
            storage_id: storage_id.clone(),
            sha256,
            size: blob.len() as u64,
            content_type,
        };
        state
            .files
            .insert(storage_id.clone(), StoredFile { blob, metadata });
        Ok(storage_id)
    }
}

#[async_trait]
impl SchedulerHost for MockHost {
    async fn run_after(
        &self,
        delay: Duration,
        function: &FunctionReference,
        args: Value,
    ) -> anyhow::Result<ScheduledFunctionId> {
        Ok(self.schedule(SystemTime::now() + delay, function, args))
    }

    async fn run_at(
        &self,
        timestamp: SystemTime,
        function: &FunctionReference,
        args: Value,
    ) -> anyhow::Result<ScheduledFunctionId> {
        Ok(self.schedule(timestamp, function, args))
    }

    async fn cancel(&self, id: &ScheduledFunctionId) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let call = state
            .scheduled
            .iter_mut()
            .find(|call| call.id == *id)
            .with_context(|| format!("Scheduled function {id} not found"))?;
        call.canceled = true;
        Ok(())
    }
}

#[async_trait]
impl ActionHost for MockHost {
    async fn run_query(&self, function: &FunctionReference, args: Value) -> anyhow::Result<Value> {
        let native = self.arc()?.query_ctx();
        self.registry()?
            .invoke_query(&function.path, native, args)
            .await
    }

    /// Mutations are transactional: a failed mutation leaves no writes
    /// behind.
    async fn run_mutation(
        &self,
        function: &FunctionReference,
        args: Value,
    ) -> anyhow::Result<Value> {
        let native = self.arc()?.mutation_ctx();
        let snapshot = self.state.lock().clone();
        let result = self
            .registry()?
            .invoke_mutation(&function.path, native, args)
            .await;
        if result.is_err() {
            *self.state.lock() = snapshot;
        }
        result
    }

    async fn run_action(&self, function: &FunctionReference, args: Value) -> anyhow::Result<Value> {
        let native = self.arc()?.action_ctx();
        self.registry()?
            .invoke_action(&function.path, native, args)
            .await
    }

    async fn vector_search(
        &self,
        table: &TableName,
        index_name: &str,
        query: &VectorSearchQuery,
    ) -> anyhow::Result<Vec<VectorSearchResult>> {
        let limit = query.resolved_limit()?;
        let index = self
            .schema
            .get(table)
            .and_then(|definition| definition.vector_index_definition(index_name))
            .with_context(|| format!("Vector index `{table}.{index_name}` not found"))?;
        anyhow::ensure!(
            query.vector.len() == index.dimensions as usize,
            "Vector index `{index_name}` has {} dimensions, the query vector has {}",
            index.dimensions,
            query.vector.len()
        );
        for (field, _) in &query.filter {
            anyhow::ensure!(
                index.filter_fields.contains(field),
                "`{field}` is not a filter field of vector index `{index_name}`"
            );
        }
        let mut results = vec![];
        for document in self.documents(table) {
            if !query.filter.is_empty()
                && !query
                    .filter
                    .iter()
                    .any(|(field, value)| document.get_path(field) == Some(value))
            {
                continue;
            }
            let Some(Value::Array(elements)) = document.get_path(&index.vector_field) else {
                continue;
            };
            let Some(vector) = elements.iter().map(Value::as_f64).collect::<Option<Vec<_>>>()
            else {
                continue;
            };
            if vector.len() != query.vector.len() {
                continue;
            }
            let Some(id) = document.get_path(ID_FIELD).and_then(Value::as_str) else {
                continue;
            };
            results.push(VectorSearchResult {
                id: DocumentId::new(id),
                score: cosine_similarity(&query.vector, &vector),
            });
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        Ok(results)
    }
}
