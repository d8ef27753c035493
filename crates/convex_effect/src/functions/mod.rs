//! Registering handlers as host functions.
//!
//! A handler is an async function of its context and its decoded arguments
//! returning `anyhow::Result<Result<R, E>>`. Registration wraps it into a
//! [`RegisteredFunction`] that the host invokes with raw argument values.
//! Invocation runs in this order:
//!
//! 1. Arguments are checked against the signature's validator (and decoded
//!    with its schema, if it has one). A rejection is raised as a
//!    `BadRequest` [`FunctionFailure`] and the handler never runs.
//! 2. The handler's context is built from the native context.
//! 3. The handler runs.
//! 4. `Ok(Ok(r))` is encoded and checked against the declared return type.
//!    A handler returning something it declared it wouldn't is fatal.
//! 5. `Ok(Err(e))` is raised as an `Application` [`FunctionFailure`] that
//!    the host can recover with [`FunctionFailureAnyhowExt`], and `Err(e)`
//!    is passed through as a fatal error.
//!
//! [`FunctionFailureAnyhowExt`]: crate::errors::FunctionFailureAnyhowExt

mod router;

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    sync::Arc,
};

use anyhow::Context;
use bytes::Bytes;
use futures::{
    FutureExt,
    future::BoxFuture,
};
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use tracing::Instrument;

pub use self::router::{
    HttpAction,
    HttpRouter,
    RoutableMethod,
    http_action,
};
use crate::{
    context::{
        ActionCtx,
        MutationCtx,
        QueryCtx,
    },
    errors::{
        FunctionFailure,
        SchemaError,
    },
    host::{
        NativeActionCtx,
        NativeMutationCtx,
        NativeQueryCtx,
    },
    knobs::LOG_FUNCTION_ARGUMENTS,
    schema::{
        Schema,
        bridge,
    },
    validator::{
        Validator,
        ValidatorJson,
    },
    value::{
        Value,
        from_value,
        to_value,
    },
};

pub const ARGS_VALIDATION_ERROR: &str = "ArgsValidationError";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionKind {
    Query,
    Mutation,
    Action,
    HttpAction,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FunctionKind::Query => "query",
            FunctionKind::Mutation => "mutation",
            FunctionKind::Action => "action",
            FunctionKind::HttpAction => "HTTP action",
        };
        write!(f, "{s}")
    }
}

/// Internal functions can only be called by other functions and the
/// scheduler, never directly by clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Public,
    Internal,
}

/// Names a function for the scheduler and for `ActionCtx::run_*`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionReference {
    pub kind: FunctionKind,
    /// eg `messages:send`
    pub path: String,
}

impl FunctionReference {
    pub fn query(path: impl Into<String>) -> Self {
        Self {
            kind: FunctionKind::Query,
            path: path.into(),
        }
    }

    pub fn mutation(path: impl Into<String>) -> Self {
        Self {
            kind: FunctionKind::Mutation,
            path: path.into(),
        }
    }

    pub fn action(path: impl Into<String>) -> Self {
        Self {
            kind: FunctionKind::Action,
            path: path.into(),
        }
    }
}

impl fmt::Display for FunctionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`", self.kind, self.path)
    }
}

/// What a function accepts and returns.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSignature {
    args: Validator,
    args_schema: Option<Schema>,
    returns: Option<Validator>,
    returns_schema: Option<Schema>,
}

impl FunctionSignature {
    /// Declared directly with validators. `None` leaves the return value
    /// unchecked.
    pub fn native(args: Validator, returns: Option<Validator>) -> Self {
        Self {
            args,
            args_schema: None,
            returns,
            returns_schema: None,
        }
    }

    /// Declared with schemas, compiled to validators here. Arguments are
    /// decoded with `args` before reaching the handler and return values
    /// encoded with `returns` after it.
    pub fn schema(args: Schema, returns: Schema) -> Result<Self, SchemaError> {
        Ok(Self {
            args: bridge::compile_args(&args)?,
            args_schema: Some(args),
            returns: Some(bridge::compile(&returns)?),
            returns_schema: Some(returns),
        })
    }

    pub fn args(&self) -> &Validator {
        &self.args
    }

    pub fn returns(&self) -> Option<&Validator> {
        self.returns.as_ref()
    }

    fn decode_args(&self, args: Value) -> Result<Value, FunctionFailure> {
        let bad_request =
            |message: String| FunctionFailure::bad_request(ARGS_VALIDATION_ERROR, message);
        if let Err(e) = self.args.check_value(&args) {
            return Err(bad_request(e.to_string()));
        }
        match &self.args_schema {
            Some(schema) => schema
                .decode(&args)
                .map_err(|issue| bad_request(issue.to_string())),
            None => Ok(args),
        }
    }

    fn encode_returns(&self, value: Value) -> anyhow::Result<Value> {
        let encoded = match &self.returns_schema {
            Some(schema) => schema
                .encode(&value)
                .context("Function returned a value that doesn't match its schema")?,
            None => value,
        };
        if let Some(returns) = &self.returns {
            returns
                .check_value(&encoded)
                .context("Function returned a value that doesn't match its validator")?;
        }
        Ok(encoded)
    }
}

type ErasedHandler<C> = Arc<
    dyn Fn(C, Value) -> BoxFuture<'static, anyhow::Result<Result<Value, FunctionFailure>>>
        + Send
        + Sync,
>;

fn erase<C, A, R, E, F, Fut>(handler: F) -> ErasedHandler<C>
where
    C: Send + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<FunctionFailure> + Send + 'static,
    F: Fn(C, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Result<R, E>>> + Send + 'static,
{
    Arc::new(move |ctx: C, args: Value| {
        let started = from_value::<A>(args).map(|args| handler(ctx, args));
        run_erased(started).boxed()
    })
}

async fn run_erased<R, E, Fut>(
    started: anyhow::Result<Fut>,
) -> anyhow::Result<Result<Value, FunctionFailure>>
where
    R: Serialize,
    E: Into<FunctionFailure>,
    Fut: Future<Output = anyhow::Result<Result<R, E>>>,
{
    let running = match started {
        Ok(running) => running,
        Err(e) => {
            return Ok(Err(FunctionFailure::bad_request(
                ARGS_VALIDATION_ERROR,
                format!("{e:#}"),
            )));
        },
    };
    match running.await? {
        Ok(r) => Ok(Ok(to_value(&r)?)),
        Err(e) => Ok(Err(e.into())),
    }
}

#[derive(Clone)]
enum Handler {
    Query(ErasedHandler<QueryCtx>),
    Mutation(ErasedHandler<MutationCtx>),
    Action(ErasedHandler<ActionCtx>),
}

#[derive(Clone)]
pub struct RegisteredFunction {
    visibility: Visibility,
    signature: FunctionSignature,
    handler: Handler,
}

impl fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("kind", &self.kind())
            .field("visibility", &self.visibility)
            .field("signature", &self.signature)
            .finish()
    }
}

impl RegisteredFunction {
    pub fn kind(&self) -> FunctionKind {
        match self.handler {
            Handler::Query(_) => FunctionKind::Query,
            Handler::Mutation(_) => FunctionKind::Mutation,
            Handler::Action(_) => FunctionKind::Action,
        }
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    async fn run<C>(
        &self,
        path: &str,
        handler: &ErasedHandler<C>,
        ctx: impl FnOnce() -> C,
        args: Value,
    ) -> anyhow::Result<Value> {
        let kind = self.kind();
        let span = tracing::info_span!("udf", %kind, path);
        async move {
            if *LOG_FUNCTION_ARGUMENTS {
                tracing::debug!("Invoked with {args}");
            }
            let args = match self.signature.decode_args(args) {
                Ok(args) => args,
                Err(failure) => {
                    tracing::debug!("Rejected arguments: {failure}");
                    return Err(anyhow::Error::new(failure));
                },
            };
            match handler(ctx(), args).await {
                Ok(Ok(value)) => self.signature.encode_returns(value),
                Ok(Err(failure)) => {
                    tracing::debug!("Failed with {}: {failure}", failure.tag);
                    Err(anyhow::Error::new(failure))
                },
                Err(e) => {
                    tracing::error!("Fatal error: {e:#}");
                    Err(e)
                },
            }
        }
        .instrument(span)
        .await
    }
}

fn new_function<C, A, R, E, F, Fut>(
    visibility: Visibility,
    signature: FunctionSignature,
    handler: F,
    wrap: fn(ErasedHandler<C>) -> Handler,
) -> RegisteredFunction
where
    C: Send + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<FunctionFailure> + Send + 'static,
    F: Fn(C, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Result<R, E>>> + Send + 'static,
{
    RegisteredFunction {
        visibility,
        signature,
        handler: wrap(erase(handler)),
    }
}

macro_rules! constructors {
    ($($(#[$attr:meta])* $name:ident($ctx:ty, $visibility:ident, $variant:ident);)*) => {
        $(
            $(#[$attr])*
            pub fn $name<A, R, E, F, Fut>(signature: FunctionSignature, handler: F) -> RegisteredFunction
            where
                A: DeserializeOwned + Send + 'static,
                R: Serialize + Send + 'static,
                E: Into<FunctionFailure> + Send + 'static,
                F: Fn($ctx, A) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = anyhow::Result<Result<R, E>>> + Send + 'static,
            {
                new_function(Visibility::$visibility, signature, handler, Handler::$variant)
            }
        )*
    };
}

constructors! {
    /// A read-only function, rerun by the host whenever what it read
    /// changes.
    query(QueryCtx, Public, Query);
    internal_query(QueryCtx, Internal, Query);
    /// A transactional read-write function.
    mutation(MutationCtx, Public, Mutation);
    internal_mutation(MutationCtx, Internal, Mutation);
    /// A function that can have side effects outside the database. Actions
    /// aren't transactional and aren't retried.
    action(ActionCtx, Public, Action);
    internal_action(ActionCtx, Internal, Action);
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionManifestEntry {
    pub path: String,
    pub kind: FunctionKind,
    pub visibility: Visibility,
    pub args: ValidatorJson,
    pub returns: Option<ValidatorJson>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionManifest {
    pub functions: Vec<FunctionManifestEntry>,
    /// `METHOD /path`, prefix routes ending in `*`.
    pub http_routes: Vec<String>,
}

/// Every function of an application, by path.
#[derive(Clone, Debug, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, RegisteredFunction>,
    http: Option<HttpRouter>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `path` is `module:name`, where `module` is a `/` separated path.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        function: RegisteredFunction,
    ) -> Result<FunctionReference, SchemaError> {
        let path = path.into();
        validate_path(&path)?;
        if self.functions.contains_key(&path) {
            return Err(SchemaError::DuplicateFunction { path });
        }
        let reference = FunctionReference {
            kind: function.kind(),
            path: path.clone(),
        };
        self.functions.insert(path, function);
        Ok(reference)
    }

    pub fn set_http_router(&mut self, router: HttpRouter) {
        self.http = Some(router);
    }

    pub fn get(&self, path: &str) -> Option<&RegisteredFunction> {
        self.functions.get(path)
    }

    pub fn reference(&self, path: &str) -> Option<FunctionReference> {
        self.functions.get(path).map(|f| FunctionReference {
            kind: f.kind(),
            path: path.to_string(),
        })
    }

    pub fn manifest(&self) -> anyhow::Result<FunctionManifest> {
        let functions = self
            .functions
            .iter()
            .map(|(path, f)| {
                Ok(FunctionManifestEntry {
                    path: path.clone(),
                    kind: f.kind(),
                    visibility: f.visibility,
                    args: ValidatorJson::try_from(f.signature.args.clone())?,
                    returns: f
                        .signature
                        .returns
                        .clone()
                        .map(ValidatorJson::try_from)
                        .transpose()?,
                })
            })
            .collect::<anyhow::Result<_>>()?;
        let http_routes = self
            .http
            .as_ref()
            .map(|router| router.routes())
            .unwrap_or_default();
        Ok(FunctionManifest {
            functions,
            http_routes,
        })
    }

    fn lookup(&self, path: &str, kind: FunctionKind) -> anyhow::Result<&RegisteredFunction> {
        let function = self
            .functions
            .get(path)
            .with_context(|| format!("No function registered at `{path}`"))?;
        anyhow::ensure!(
            function.kind() == kind,
            "`{path}` is a {}, not a {kind}",
            function.kind()
        );
        Ok(function)
    }

    pub async fn invoke_query(
        &self,
        path: &str,
        native: NativeQueryCtx,
        args: Value,
    ) -> anyhow::Result<Value> {
        let function = self.lookup(path, FunctionKind::Query)?;
        let Handler::Query(handler) = &function.handler else {
            anyhow::bail!("`{path}` has no query handler");
        };
        function
            .run(path, handler, || QueryCtx::new(native), args)
            .await
    }

    pub async fn invoke_mutation(
        &self,
        path: &str,
        native: NativeMutationCtx,
        args: Value,
    ) -> anyhow::Result<Value> {
        let function = self.lookup(path, FunctionKind::Mutation)?;
        let Handler::Mutation(handler) = &function.handler else {
            anyhow::bail!("`{path}` has no mutation handler");
        };
        function
            .run(path, handler, || MutationCtx::new(native), args)
            .await
    }

    pub async fn invoke_action(
        &self,
        path: &str,
        native: NativeActionCtx,
        args: Value,
    ) -> anyhow::Result<Value> {
        let function = self.lookup(path, FunctionKind::Action)?;
        let Handler::Action(handler) = &function.handler else {
            anyhow::bail!("`{path}` has no action handler");
        };
        function
            .run(path, handler, || ActionCtx::new(native), args)
            .await
    }

    /// Route an HTTP request to the registered router. Requests matching no
    /// route get a 404.
    pub async fn invoke_http(
        &self,
        native: NativeActionCtx,
        request: http::Request<Bytes>,
    ) -> anyhow::Result<http::Response<Bytes>> {
        let router = self
            .http
            .as_ref()
            .context("No HTTP router registered")?;
        router.run(native, request).await
    }
}

fn validate_path(path: &str) -> Result<(), SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidFunctionPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    let (module, name) = path
        .split_once(':')
        .ok_or_else(|| invalid("expected `module:name`"))?;
    if module.is_empty() || module.split('/').any(str::is_empty) {
        return Err(invalid("module path has an empty segment"));
    }
    if !module
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
    {
        return Err(invalid("module path has invalid characters"));
    }
    match name.chars().next() {
        None => return Err(invalid("function name is empty")),
        Some(c) if c.is_ascii_digit() => {
            return Err(invalid("function name starts with a digit"));
        },
        Some(_) => {},
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("function name has invalid characters"));
    }
    Ok(())
}
