//! Typed-failure adapters for writing Convex functions in Rust.
//!
//! Handlers receive a [`QueryCtx`], [`MutationCtx`] or [`ActionCtx`] built
//! from the host's native context, and return
//! `anyhow::Result<Result<T, E>>`: the outer error is fatal, the inner `E`
//! is a tagged failure the caller can recover from (see [`errors`]).
//!
//! Record types are described once with a [`Schema`], which yields both the
//! decoder used at runtime and the validator the host checks arguments and
//! documents against. A [`Model`] binds a schema to a table and derives the
//! create, update and document shapes from it.
//!
//! ```ignore
//! let messages = Model::<Message>::new("messages", struct_schema!(
//!     "channel" => s.string(),
//!     "body" => s.string(),
//! ))?;
//!
//! let list = query(
//!     FunctionSignature::schema(struct_schema!("channel" => s.string()), s.array(s.any()))?,
//!     move |ctx: QueryCtx, args: ListArgs| {
//!         let messages = messages.clone();
//!         async move {
//!             let query = messages
//!                 .query(ctx.db())
//!                 .with_index("by_channel", IndexRange::all().eq("channel", args.channel));
//!             query.collect().await.map(|r| r.map_err(EffectError::from))
//!         }
//!     },
//! );
//! registry.register("messages:list", list)?;
//! ```

pub mod auth;
pub mod context;
pub mod db;
pub mod definition;
pub mod document;
pub mod errors;
pub mod functions;
pub mod host;
pub mod knobs;
pub mod model;
pub mod scheduler;
pub mod schema;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod validator;
pub mod value;
pub mod vector;

pub use self::{
    auth::{
        Auth,
        UserIdentity,
    },
    context::{
        ActionCtx,
        MutationCtx,
        QueryCtx,
    },
    db::{
        DatabaseReader,
        DatabaseWriter,
        FilterBuilder,
        IndexRange,
        Order,
        PaginationOptions,
        PaginationResult,
        SearchFilter,
    },
    definition::{
        SchemaDefinition,
        TableDefinition,
    },
    document::Document,
    errors::{
        DocumentCodecError,
        DocumentNotFound,
        DocumentNotUnique,
        EffectError,
        FileNotFound,
        FunctionFailure,
        InvalidId,
        SchemaError,
        TaggedFailure,
    },
    functions::{
        FunctionReference,
        FunctionRegistry,
        FunctionSignature,
        HttpRouter,
        RoutableMethod,
        action,
        http_action,
        internal_action,
        internal_mutation,
        internal_query,
        mutation,
        query,
    },
    model::Model,
    schema::{
        Schema,
        s,
    },
    types::{
        DocumentId,
        ScheduledFunctionId,
        StorageId,
        TableName,
    },
    validator::Validator,
    value::Value,
};
