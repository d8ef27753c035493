//! HTTP actions and the router that dispatches to them.

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    str::FromStr,
    sync::Arc,
};

use bytes::Bytes;
use futures::{
    FutureExt,
    future::BoxFuture,
};
use http::{
    Method,
    Request,
    Response,
    StatusCode,
    header::CONTENT_TYPE,
};
use serde_json::{
    Value as JsonValue,
    json,
};
use tracing::Instrument;

use crate::{
    context::ActionCtx,
    errors::{
        FailureKind,
        FunctionFailure,
        SchemaError,
    },
    host::NativeActionCtx,
};

/// Paths under this prefix are served by the host's file storage.
const RESERVED_PREFIX: &str = "/.files/";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum RoutableMethod {
    Delete,
    Get,
    Options,
    Patch,
    Post,
    Put,
}

impl FromStr for RoutableMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DELETE" => Ok(Self::Delete),
            "GET" => Ok(Self::Get),
            "OPTIONS" => Ok(Self::Options),
            "PATCH" => Ok(Self::Patch),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "HEAD" => Ok(Self::Get),
            _ => anyhow::bail!("Expected routable HTTP method, got {:?}", s),
        }
    }
}

impl fmt::Display for RoutableMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoutableMethod::Delete => "DELETE",
            RoutableMethod::Get => "GET",
            RoutableMethod::Options => "OPTIONS",
            RoutableMethod::Patch => "PATCH",
            RoutableMethod::Post => "POST",
            RoutableMethod::Put => "PUT",
        };
        write!(f, "{s}")
    }
}

impl TryFrom<&Method> for RoutableMethod {
    type Error = anyhow::Error;

    fn try_from(method: &Method) -> anyhow::Result<Self> {
        match *method {
            Method::DELETE => Ok(Self::Delete),
            Method::GET => Ok(Self::Get),
            Method::OPTIONS => Ok(Self::Options),
            Method::PATCH => Ok(Self::Patch),
            Method::POST => Ok(Self::Post),
            Method::PUT => Ok(Self::Put),
            Method::HEAD => Ok(Self::Get),
            _ => anyhow::bail!("Expected routable HTTP method, got {:?}", method),
        }
    }
}

type ErasedHttpHandler = Arc<
    dyn Fn(
            ActionCtx,
            Request<Bytes>,
        ) -> BoxFuture<'static, anyhow::Result<Result<Response<Bytes>, FunctionFailure>>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct HttpAction {
    handler: ErasedHttpHandler,
}

impl fmt::Debug for HttpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAction").finish_non_exhaustive()
    }
}

/// An action serving HTTP requests. A typed failure becomes a JSON error
/// response.
pub fn http_action<E, F, Fut>(handler: F) -> HttpAction
where
    E: Into<FunctionFailure> + Send + 'static,
    F: Fn(ActionCtx, Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Result<Response<Bytes>, E>>> + Send + 'static,
{
    HttpAction {
        handler: Arc::new(move |ctx: ActionCtx, request: Request<Bytes>| {
            run_erased(handler(ctx, request)).boxed()
        }),
    }
}

async fn run_erased<E: Into<FunctionFailure>>(
    running: impl Future<Output = anyhow::Result<Result<Response<Bytes>, E>>>,
) -> anyhow::Result<Result<Response<Bytes>, FunctionFailure>> {
    Ok(running.await?.map_err(Into::into))
}

/// Routes requests by method and path. Exact routes win over prefix
/// routes, and among prefix routes the longest prefix wins. `HEAD`
/// requests are served by the `GET` route with the body dropped.
#[derive(Clone, Debug, Default)]
pub struct HttpRouter {
    exact: BTreeMap<(RoutableMethod, String), HttpAction>,
    prefix: BTreeMap<(RoutableMethod, String), HttpAction>,
}

impl HttpRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve exactly `path`.
    pub fn route(
        &mut self,
        method: RoutableMethod,
        path: &str,
        action: HttpAction,
    ) -> Result<(), SchemaError> {
        check_route(method, path)?;
        if self
            .exact
            .insert((method, path.to_string()), action)
            .is_some()
        {
            return Err(route_error(method, path, "route is defined more than once"));
        }
        Ok(())
    }

    /// Serve every path starting with `prefix`, which must end in `/`.
    pub fn route_prefix(
        &mut self,
        method: RoutableMethod,
        prefix: &str,
        action: HttpAction,
    ) -> Result<(), SchemaError> {
        check_route(method, prefix)?;
        if !prefix.ends_with('/') {
            return Err(route_error(method, prefix, "prefixes must end with `/`"));
        }
        if self
            .prefix
            .insert((method, prefix.to_string()), action)
            .is_some()
        {
            return Err(route_error(method, prefix, "route is defined more than once"));
        }
        Ok(())
    }

    /// Every route as `METHOD /path`, with prefix routes ending in `*`.
    pub fn routes(&self) -> Vec<String> {
        let exact = self
            .exact
            .keys()
            .map(|(method, path)| format!("{method} {path}"));
        let prefix = self
            .prefix
            .keys()
            .map(|(method, prefix)| format!("{method} {prefix}*"));
        exact.chain(prefix).collect()
    }

    /// The action serving `path`, along with the route it matched.
    pub fn lookup(&self, method: RoutableMethod, path: &str) -> Option<(&HttpAction, String)> {
        if let Some(action) = self.exact.get(&(method, path.to_string())) {
            return Some((action, format!("{method} {path}")));
        }
        self.prefix
            .iter()
            .filter(|((m, prefix), _)| *m == method && path.starts_with(prefix.as_str()))
            .max_by_key(|((_, prefix), _)| prefix.len())
            .map(|((_, prefix), action)| (action, format!("{method} {prefix}*")))
    }

    pub(crate) async fn run(
        &self,
        native: NativeActionCtx,
        request: Request<Bytes>,
    ) -> anyhow::Result<Response<Bytes>> {
        let is_head = *request.method() == Method::HEAD;
        let Ok(method) = RoutableMethod::try_from(request.method()) else {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        };
        let path = request.uri().path().to_string();
        let Some((action, route)) = self.lookup(method, &path) else {
            return plain(StatusCode::NOT_FOUND, "No matching routes found");
        };
        let span = tracing::info_span!("http_action", %route);
        let outcome = (action.handler)(ActionCtx::new(native), request)
            .instrument(span)
            .await;
        let mut response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(failure)) => {
                tracing::debug!("{route} failed with {}: {failure}", failure.tag);
                failure_response(&failure)?
            },
            Err(e) => {
                tracing::error!("{route} raised a fatal error: {e:#}");
                return Err(e);
            },
        };
        if is_head {
            *response.body_mut() = Bytes::new();
        }
        Ok(response)
    }
}

fn route_error(method: RoutableMethod, path: &str, reason: &str) -> SchemaError {
    SchemaError::InvalidRoute {
        route: format!("{method} {path}"),
        reason: reason.to_string(),
    }
}

fn check_route(method: RoutableMethod, path: &str) -> Result<(), SchemaError> {
    if !path.starts_with('/') {
        return Err(route_error(method, path, "paths must start with `/`"));
    }
    if path.starts_with(RESERVED_PREFIX) || format!("{path}/") == RESERVED_PREFIX {
        return Err(route_error(method, path, "`/.files/` is reserved"));
    }
    Ok(())
}

fn plain(status: StatusCode, body: &'static str) -> anyhow::Result<Response<Bytes>> {
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain")
        .body(Bytes::from_static(body.as_bytes()))?)
}

fn failure_response(failure: &FunctionFailure) -> anyhow::Result<Response<Bytes>> {
    let status = match failure.kind {
        FailureKind::BadRequest => StatusCode::BAD_REQUEST,
        FailureKind::Application => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let data = failure.data.clone().map(JsonValue::try_from).transpose()?;
    let body = json!({
        "code": failure.tag,
        "message": failure.message,
        "data": data,
    });
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Bytes::from(serde_json::to_vec(&body)?))?)
}
