//! The host runtime's native capabilities.
//!
//! A host implements these traits and hands a fresh native context to each
//! function invocation. Everything in them reports failure through
//! `anyhow::Error`, and absence as `None`; the adapters in this crate turn
//! that into typed failures. Nothing in this crate retains a host handle
//! past the invocation it was given for.

use std::{
    sync::Arc,
    time::{
        Duration,
        SystemTime,
    },
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    auth::UserIdentity,
    db::{
        PaginationOptions,
        PaginationResult,
        QuerySpec,
    },
    functions::FunctionReference,
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

#[async_trait]
pub trait DatabaseReaderHost: Send + Sync {
    async fn get(&self, id: &DocumentId) -> anyhow::Result<Option<Value>>;

    /// Returns the normalized id if `id` is a valid id for `table`.
    fn normalize_id(&self, table: &TableName, id: &str) -> Option<DocumentId>;

    /// Run a query, reading at most `limit` documents when given.
    async fn query(&self, query: &QuerySpec, limit: Option<usize>) -> anyhow::Result<Vec<Value>>;

    async fn paginate(
        &self,
        query: &QuerySpec,
        options: &PaginationOptions,
    ) -> anyhow::Result<PaginationResult<Value>>;
}

#[async_trait]
pub trait DatabaseWriterHost: DatabaseReaderHost {
    /// `value` holds only user fields. The host assigns `_id` and
    /// `_creationTime`.
    async fn insert(&self, table: &TableName, value: Object) -> anyhow::Result<DocumentId>;

    /// Shallow merge of `value` into the document.
    async fn patch(&self, id: &DocumentId, value: Object) -> anyhow::Result<()>;

    /// Replace every user field of the document.
    async fn replace(&self, id: &DocumentId, value: Object) -> anyhow::Result<()>;

    /// Deleting a missing document is not an error.
    async fn delete(&self, id: &DocumentId) -> anyhow::Result<()>;
}

#[async_trait]
pub trait AuthHost: Send + Sync {
    async fn get_user_identity(&self) -> anyhow::Result<Option<UserIdentity>>;
}

#[async_trait]
pub trait StorageReaderHost: Send + Sync {
    async fn get_url(&self, id: &StorageId) -> anyhow::Result<Option<String>>;

    async fn get_metadata(&self, id: &StorageId) -> anyhow::Result<Option<FileMetadata>>;
}

#[async_trait]
pub trait StorageWriterHost: StorageReaderHost {
    async fn generate_upload_url(&self) -> anyhow::Result<String>;

    async fn delete(&self, id: &StorageId) -> anyhow::Result<()>;
}

#[async_trait]
pub trait StorageActionHost: StorageWriterHost {
    async fn get(&self, id: &StorageId) -> anyhow::Result<Option<Bytes>>;

    async fn store(&self, blob: Bytes, content_type: Option<String>) -> anyhow::Result<StorageId>;
}

#[async_trait]
pub trait SchedulerHost: Send + Sync {
    async fn run_after(
        &self,
        delay: Duration,
        function: &FunctionReference,
        args: Value,
    ) -> anyhow::Result<ScheduledFunctionId>;

    async fn run_at(
        &self,
        timestamp: SystemTime,
        function: &FunctionReference,
        args: Value,
    ) -> anyhow::Result<ScheduledFunctionId>;

    async fn cancel(&self, id: &ScheduledFunctionId) -> anyhow::Result<()>;
}

/// Capabilities only actions have.
#[async_trait]
pub trait ActionHost: Send + Sync {
    async fn run_query(&self, function: &FunctionReference, args: Value) -> anyhow::Result<Value>;

    async fn run_mutation(
        &self,
        function: &FunctionReference,
        args: Value,
    ) -> anyhow::Result<Value>;

    async fn run_action(&self, function: &FunctionReference, args: Value) -> anyhow::Result<Value>;

    async fn vector_search(
        &self,
        table: &TableName,
        index_name: &str,
        query: &VectorSearchQuery,
    ) -> anyhow::Result<Vec<VectorSearchResult>>;
}

/// What the host passes to a query invocation.
#[derive(Clone)]
pub struct NativeQueryCtx {
    pub db: Arc<dyn DatabaseReaderHost>,
    pub auth: Arc<dyn AuthHost>,
    pub storage: Arc<dyn StorageReaderHost>,
}

/// What the host passes to a mutation invocation.
#[derive(Clone)]
pub struct NativeMutationCtx {
    pub db: Arc<dyn DatabaseWriterHost>,
    pub auth: Arc<dyn AuthHost>,
    pub storage: Arc<dyn StorageWriterHost>,
    pub scheduler: Arc<dyn SchedulerHost>,
}

/// What the host passes to an action invocation.
#[derive(Clone)]
pub struct NativeActionCtx {
    pub auth: Arc<dyn AuthHost>,
    pub storage: Arc<dyn StorageActionHost>,
    pub scheduler: Arc<dyn SchedulerHost>,
    pub runner: Arc<dyn ActionHost>,
}
