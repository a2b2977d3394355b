//! Route table and lookup, the hot path of every dispatch.

#![deny(clippy::inefficient_to_string)]
#![deny(clippy::format_push_string)]
#![deny(clippy::unnecessary_to_owned)]

use crate::handler::Handler;
use crate::request::{ParamVec, Request};
use crate::validator::SchemaValidator;
use http::Method;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Registration failures. Lookups never fail; a miss is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    InvalidMethod(String),
    InvalidPath(String),
    InvalidSchema { context: String, message: String },
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::InvalidMethod(m) => write!(f, "invalid HTTP method token '{m}'"),
            RouteError::InvalidPath(p) => write!(f, "route path must start with '/': '{p}'"),
            RouteError::InvalidSchema { context, message } => {
                write!(f, "invalid {context} schema: {message}")
            }
        }
    }
}

impl std::error::Error for RouteError {}

/// What kind of exchange a route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    Http,
    WebSocket,
    Sse,
}

/// Optional JSON Schemas attached at registration, compiled eagerly.
#[derive(Debug, Clone, Default)]
pub struct RouteSchemas {
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub parameters: Option<Value>,
}

impl RouteSchemas {
    #[must_use]
    pub fn request(mut self, schema: Value) -> Self {
        self.request = Some(schema);
        self
    }

    #[must_use]
    pub fn response(mut self, schema: Value) -> Self {
        self.response = Some(schema);
        self
    }

    #[must_use]
    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(Arc<str>),
    /// `{*name}`: captures the remainder of the path, slashes included
    Tail(Arc<str>),
}

/// One registered route. Immutable once built.
pub struct Route {
    method: Method,
    path: String,
    segments: Option<Vec<Segment>>,
    handler: Arc<dyn Handler>,
    kind: RouteKind,
    request_schema: Option<SchemaValidator>,
    response_schema: Option<SchemaValidator>,
    parameter_schema: Option<SchemaValidator>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler", &self.handler.name())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Route {
    fn build(
        method: &str,
        path: &str,
        handler: Arc<dyn Handler>,
        kind: RouteKind,
        schemas: RouteSchemas,
    ) -> Result<Self, RouteError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| RouteError::InvalidMethod(method.to_string()))?;
        let path = strip_query(path);
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath(path.to_string()));
        }
        Ok(Self {
            method,
            segments: parse_template(path),
            path: path.to_string(),
            handler,
            kind,
            request_schema: compile(schemas.request, "request")?,
            response_schema: compile(schemas.response, "response")?,
            parameter_schema: compile(schemas.parameters, "parameter")?,
        })
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Registered path, query string already removed.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    #[must_use]
    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    #[must_use]
    pub fn request_schema(&self) -> Option<&SchemaValidator> {
        self.request_schema.as_ref()
    }

    #[must_use]
    pub fn response_schema(&self) -> Option<&SchemaValidator> {
        self.response_schema.as_ref()
    }

    #[must_use]
    pub fn parameter_schema(&self) -> Option<&SchemaValidator> {
        self.parameter_schema.as_ref()
    }

    /// Path match only; method and predicate are checked by the table.
    fn match_path(&self, path: &str) -> Option<ParamVec> {
        let Some(segments) = &self.segments else {
            return (self.path == path).then(ParamVec::new);
        };
        let mut params = ParamVec::new();
        let mut rest = path.strip_prefix('/')?;
        for (i, segment) in segments.iter().enumerate() {
            if let Segment::Tail(name) = segment {
                params.push((Arc::clone(name), rest.to_string()));
                return Some(params);
            }
            let (head, tail) = match rest.split_once('/') {
                Some((h, t)) => (h, Some(t)),
                None => (rest, None),
            };
            match segment {
                Segment::Static(s) if s == head => {}
                Segment::Param(name) if !head.is_empty() => {
                    params.push((Arc::clone(name), head.to_string()));
                }
                _ => return None,
            }
            match tail {
                Some(t) => rest = t,
                None if i + 1 == segments.len() => return Some(params),
                None => {
                    // A trailing `{*tail}` may still match nothing
                    return match segments.get(i + 1) {
                        Some(Segment::Tail(name)) if i + 2 == segments.len() => {
                            params.push((Arc::clone(name), String::new()));
                            Some(params)
                        }
                        _ => None,
                    };
                }
            }
        }
        None
    }
}

fn compile(schema: Option<Value>, context: &str) -> Result<Option<SchemaValidator>, RouteError> {
    schema
        .map(|s| {
            SchemaValidator::compile(s).map_err(|e| RouteError::InvalidSchema {
                context: context.to_string(),
                message: e.message,
            })
        })
        .transpose()
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(p, _)| p)
}

/// `None` for fully static paths, which then match by string equality.
fn parse_template(path: &str) -> Option<Vec<Segment>> {
    if !path.contains('{') {
        return None;
    }
    let raw: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let last = raw.len() - 1;
    Some(
        raw.iter()
            .enumerate()
            .map(|(i, seg)| match seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) if i == last && name.starts_with('*') => {
                    Segment::Tail(Arc::from(&name[1..]))
                }
                Some(name) if !name.is_empty() => Segment::Param(Arc::from(name)),
                _ => Segment::Static((*seg).to_string()),
            })
            .collect(),
    )
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Captured `{name}` segments, in path order
    pub path_params: ParamVec,
}

impl RouteMatch {
    /// Last capture wins for duplicate names.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Ordered, persistent route table.
///
/// Every registration returns a new table sharing the existing `Arc<Route>` entries; the
/// receiver is left unchanged, so in-flight lookups keep a consistent snapshot.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Arc<Vec<Arc<Route>>>,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.routes.iter()).finish()
    }
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    pub fn add(
        &self,
        method: &str,
        path: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<RouteTable, RouteError> {
        self.push(Route::build(method, path, handler, RouteKind::Http, RouteSchemas::default())?)
    }

    pub fn add_with_schemas(
        &self,
        method: &str,
        path: &str,
        handler: Arc<dyn Handler>,
        schemas: RouteSchemas,
    ) -> Result<RouteTable, RouteError> {
        self.push(Route::build(method, path, handler, RouteKind::Http, schemas)?)
    }

    /// WebSocket upgrade endpoint, always `GET`.
    pub fn add_websocket(
        &self,
        path: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<RouteTable, RouteError> {
        self.push(Route::build(
            "GET",
            path,
            handler,
            RouteKind::WebSocket,
            RouteSchemas::default(),
        )?)
    }

    /// Server-sent events endpoint, always `GET`.
    pub fn add_sse(&self, path: &str, handler: Arc<dyn Handler>) -> Result<RouteTable, RouteError> {
        self.push(Route::build(
            "GET",
            path,
            handler,
            RouteKind::Sse,
            RouteSchemas::default(),
        )?)
    }

    fn push(&self, route: Route) -> Result<RouteTable, RouteError> {
        info!(
            method = %route.method,
            path = %route.path,
            handler = %route.handler.name(),
            kind = ?route.kind,
            position = self.routes.len(),
            "Route registered"
        );
        let mut routes = Vec::with_capacity(self.routes.len() + 1);
        routes.extend(self.routes.iter().map(Arc::clone));
        routes.push(Arc::new(route));
        Ok(RouteTable {
            routes: Arc::new(routes),
        })
    }

    /// Look up `method` and `target`; predicates see a minimal request built from both.
    #[must_use]
    pub fn find(&self, method: &str, target: &str) -> Option<RouteMatch> {
        let probe = Request::builder(method, target).build();
        self.find_for(&probe)
    }

    /// First route, in registration order, whose method, path and handler predicate all agree.
    #[must_use]
    pub fn find_for(&self, request: &Request) -> Option<RouteMatch> {
        let method = request.method();
        let path = strip_query(request.path());
        for route in self.routes.iter() {
            if !route.method.as_str().eq_ignore_ascii_case(method) {
                continue;
            }
            let Some(path_params) = route.match_path(path) else {
                continue;
            };
            if !route.handler.matches(request) {
                debug!(
                    method = %method,
                    path = %path,
                    handler = %route.handler.name(),
                    "Route vetoed by handler"
                );
                continue;
            }
            debug!(
                method = %method,
                path = %path,
                route_pattern = %route.path,
                handler = %route.handler.name(),
                path_params = ?path_params,
                "Route matched"
            );
            return Some(RouteMatch {
                route: Arc::clone(route),
                path_params,
            });
        }
        debug!(method = %method, path = %path, "No route matched");
        None
    }
}
