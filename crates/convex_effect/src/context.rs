//! The contexts handed to function handlers.
//!
//! Each is built once per invocation from the native context the host
//! passes in, before the handler starts, and is never changed afterwards.
//! A handler only receives the capabilities of its function kind: queries
//! can't write, and only actions can call other functions.

use std::sync::Arc;

use serde::{
    Serialize,
    de::DeserializeOwned,
};

use crate::{
    auth::Auth,
    db::{
        DatabaseReader,
        DatabaseWriter,
    },
    errors::{
        FunctionFailure,
        FunctionFailureAnyhowExt,
    },
    functions::{
        FunctionKind,
        FunctionReference,
    },
    host::{
        ActionHost,
        NativeActionCtx,
        NativeMutationCtx,
        NativeQueryCtx,
    },
    scheduler::Scheduler,
    storage::{
        StorageActionWriter,
        StorageReader,
        StorageWriter,
    },
    types::TableName,
    value::{
        Value,
        from_value,
        to_value,
    },
    vector::{
        VectorSearchQuery,
        VectorSearchResult,
    },
};

#[derive(Clone)]
pub struct QueryCtx {
    db: DatabaseReader,
    auth: Auth,
    storage: StorageReader,
}

impl QueryCtx {
    pub fn new(native: NativeQueryCtx) -> Self {
        Self {
            db: DatabaseReader::new(native.db),
            auth: Auth::new(native.auth),
            storage: StorageReader::new(native.storage),
        }
    }

    pub fn db(&self) -> &DatabaseReader {
        &self.db
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn storage(&self) -> &StorageReader {
        &self.storage
    }
}

#[derive(Clone)]
pub struct MutationCtx {
    db: DatabaseWriter,
    auth: Auth,
    storage: StorageWriter,
    scheduler: Scheduler,
}

impl MutationCtx {
    pub fn new(native: NativeMutationCtx) -> Self {
        Self {
            db: DatabaseWriter::new(native.db),
            auth: Auth::new(native.auth),
            storage: StorageWriter::new(native.storage),
            scheduler: Scheduler::new(native.scheduler),
        }
    }

    pub fn db(&self) -> &DatabaseWriter {
        &self.db
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn storage(&self) -> &StorageWriter {
        &self.storage
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

/// Actions have no database handle. They read and write through queries
/// and mutations run with `run_query` and `run_mutation`.
#[derive(Clone)]
pub struct ActionCtx {
    auth: Auth,
    storage: StorageActionWriter,
    scheduler: Scheduler,
    runner: Arc<dyn ActionHost>,
}

impl ActionCtx {
    pub fn new(native: NativeActionCtx) -> Self {
        Self {
            auth: Auth::new(native.auth),
            storage: StorageActionWriter::new(native.storage),
            scheduler: Scheduler::new(native.scheduler),
            runner: native.runner,
        }
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn storage(&self) -> &StorageActionWriter {
        &self.storage
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run a query in its own transaction. A typed failure raised by the
    /// query comes back as the inner `FunctionFailure`.
    pub async fn run_query<A, R>(
        &self,
        function: &FunctionReference,
        args: &A,
    ) -> anyhow::Result<Result<R, FunctionFailure>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        expect_kind(function, FunctionKind::Query)?;
        let result = self.runner.run_query(function, to_value(args)?).await;
        recover_failure(result)
    }

    /// Run a mutation in its own transaction.
    pub async fn run_mutation<A, R>(
        &self,
        function: &FunctionReference,
        args: &A,
    ) -> anyhow::Result<Result<R, FunctionFailure>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        expect_kind(function, FunctionKind::Mutation)?;
        let result = self.runner.run_mutation(function, to_value(args)?).await;
        recover_failure(result)
    }

    pub async fn run_action<A, R>(
        &self,
        function: &FunctionReference,
        args: &A,
    ) -> anyhow::Result<Result<R, FunctionFailure>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        expect_kind(function, FunctionKind::Action)?;
        let result = self.runner.run_action(function, to_value(args)?).await;
        recover_failure(result)
    }

    /// The documents nearest to `query.vector` in a vector index, best
    /// match first.
    pub async fn vector_search(
        &self,
        table: &TableName,
        index_name: &str,
        query: &VectorSearchQuery,
    ) -> anyhow::Result<Vec<VectorSearchResult>> {
        query.resolved_limit()?;
        self.runner.vector_search(table, index_name, query).await
    }
}

fn expect_kind(function: &FunctionReference, kind: FunctionKind) -> anyhow::Result<()> {
    anyhow::ensure!(
        function.kind == kind,
        "`{}` is a {}, not a {kind}",
        function.path,
        function.kind
    );
    Ok(())
}

/// Split a sub-invocation's outcome back into its two channels.
fn recover_failure<R: DeserializeOwned>(
    result: anyhow::Result<Value>,
) -> anyhow::Result<Result<R, FunctionFailure>> {
    match result {
        Ok(value) => Ok(Ok(from_value(value)?)),
        Err(e) => {
            if let Some(failure) = e.function_failure() {
                return Ok(Err(failure.clone()));
            }
            Err(e)
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{
        ActionCtx,
        MutationCtx,
        QueryCtx,
    };
    use crate::{
        auth::UserIdentity,
        definition::{
            SchemaDefinition,
            TableDefinition,
        },
        functions::FunctionReference,
        testing::MockHost,
        types::TableName,
        validator::Validator,
        value::Value,
        vector::VectorSearchQuery,
    };

    #[tokio::test]
    async fn test_identity() -> anyhow::Result<()> {
        let host = MockHost::new(SchemaDefinition::new());
        let ctx = QueryCtx::new(host.query_ctx());
        assert_eq!(ctx.auth().get_user_identity().await?, None);

        let identity = UserIdentity::new("https://auth.example.com", "user_1");
        host.set_identity(Some(identity.clone()));
        assert_eq!(ctx.auth().get_user_identity().await?, Some(identity));
        Ok(())
    }

    #[tokio::test]
    async fn test_vector_search() -> anyhow::Result<()> {
        let table: TableName = "songs".parse()?;
        let schema = SchemaDefinition::new().table(
            TableDefinition::new(table.clone(), Validator::Any).vector_index(
                "by_embedding",
                "embedding",
                2,
                ["genre"],
            ),
        )?;
        let host = MockHost::new(schema);
        let writer = MutationCtx::new(host.mutation_ctx());
        let mut ids = vec![];
        for (genre, embedding) in [("jazz", [1.0, 0.0]), ("rock", [0.0, 1.0]), ("jazz", [0.6, 0.8])] {
            let document = Value::try_from(json!({"genre": genre, "embedding": embedding}))?;
            let fields = document.into_object().unwrap_or_default();
            ids.push(writer.db().insert(&table, fields).await?);
        }

        let ctx = ActionCtx::new(host.action_ctx());
        let query = VectorSearchQuery::new(vec![1.0, 0.0]);
        let results = ctx.vector_search(&table, "by_embedding", &query).await?;
        let found: Vec<_> = results.iter().map(|r| r.id.clone()).collect();
        assert_eq!(found, vec![ids[0].clone(), ids[2].clone(), ids[1].clone()]);
        assert!((results[0].score - 1.0).abs() < 1e-9);

        let rock = VectorSearchQuery::new(vec![1.0, 0.0]).or_eq("genre", "rock");
        let results = ctx.vector_search(&table, "by_embedding", &rock).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ids[1]);

        let too_many = VectorSearchQuery::new(vec![1.0, 0.0]).limit(1000);
        assert!(ctx.vector_search(&table, "by_embedding", &too_many).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_requires_matching_kind() -> anyhow::Result<()> {
        let host = MockHost::new(SchemaDefinition::new());
        let ctx = ActionCtx::new(host.action_ctx());
        let result = ctx
            .run_query::<_, Value>(&FunctionReference::mutation("tasks:create"), &json!({}))
            .await;
        assert!(result.is_err());
        Ok(())
    }
}
