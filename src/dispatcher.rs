//! # Dispatcher
//!
//! [`App`] ties the pipeline together. One call to [`App::dispatch`] runs:
//!
//! 1. `onRequest` hooks
//! 2. route lookup (miss ⇒ 404)
//! 3. `preValidation` hooks
//! 4. parameter resolution, then descriptor, parameter and request-body schemas; every
//!    violation is collected into a single 422
//! 5. `preHandler` hooks
//! 6. the handler, with panics caught
//! 7. response conversion and the route's response schema (violation ⇒ 500)
//! 8. `onResponse` hooks, or `onError` hooks when the reply is an error
//!
//! Errors returned by handlers are translated by kind when they wrap a
//! [`Failure`]; anything else, including a panic, becomes a generic 500 whose detail is only
//! logged.
//!
//! The route table is published through [`ArcSwap`]: registration swaps in a new table while
//! in-flight dispatches finish against the snapshot they loaded.

use crate::background::{panic_message, BackgroundTasks};
use crate::config::ServerConfig;
use crate::handler::{Handler, HandlerContext};
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::lifecycle::{HookPhase, HookResult, LifecycleHooks};
use crate::params::{ParameterResolver, ResolutionError};
use crate::problem::{translate, Failure, FieldError, LocSegment};
use crate::request::{RawRequest, Request};
use crate::response::{convert, Reply, Response};
use crate::router::{RouteError, RouteSchemas, RouteTable};
use crate::validator::redact_errors;
use crate::value::BoundaryValue;
use arc_swap::ArcSwap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// An application: configuration, routes, hooks and the resolver.
pub struct App {
    config: ServerConfig,
    routes: ArcSwap<RouteTable>,
    hooks: LifecycleHooks,
    resolver: ParameterResolver,
    background: BackgroundTasks,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("routes", &self.routes.load().len())
            .field("hooks", &self.hooks)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

enum Early {
    Reply(Reply),
    Fail(Failure),
}

impl From<Failure> for Early {
    fn from(f: Failure) -> Self {
        Early::Fail(f)
    }
}

impl App {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            routes: ArcSwap::from_pointee(RouteTable::new()),
            hooks: LifecycleHooks::new(),
            resolver: ParameterResolver::new(),
            background: BackgroundTasks::new(),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: ParameterResolver) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: BackgroundTasks) -> Self {
        self.background = background;
        self
    }

    /// Start from an existing table.
    #[must_use]
    pub fn with_routes(self, table: RouteTable) -> Self {
        self.routes.store(Arc::new(table));
        self
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    #[must_use]
    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Snapshot of the current table.
    #[must_use]
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.load_full()
    }

    /// Publish `update(current)` as the new table. Retries if another registration raced.
    pub fn register<F>(&self, update: F) -> Result<(), RouteError>
    where
        F: Fn(&RouteTable) -> Result<RouteTable, RouteError>,
    {
        loop {
            let current = self.routes.load_full();
            let next = Arc::new(update(&current)?);
            let previous = self.routes.compare_and_swap(&current, next);
            if Arc::ptr_eq(&previous, &current) {
                return Ok(());
            }
            debug!("Route table changed during registration, retrying");
        }
    }

    pub fn route(
        &self,
        method: &str,
        path: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RouteError> {
        self.register(|t| t.add(method, path, Arc::clone(&handler)))
    }

    pub fn route_with_schemas(
        &self,
        method: &str,
        path: &str,
        handler: Arc<dyn Handler>,
        schemas: RouteSchemas,
    ) -> Result<(), RouteError> {
        self.register(|t| t.add_with_schemas(method, path, Arc::clone(&handler), schemas.clone()))
    }

    pub fn websocket(&self, path: &str, handler: Arc<dyn Handler>) -> Result<(), RouteError> {
        self.register(|t| t.add_websocket(path, Arc::clone(&handler)))
    }

    pub fn sse(&self, path: &str, handler: Arc<dyn Handler>) -> Result<(), RouteError> {
        self.register(|t| t.add_sse(path, Arc::clone(&handler)))
    }

    /// Parse raw transport parts, then dispatch. Undecodable requests get a 400.
    pub fn dispatch_raw(&self, raw: RawRequest) -> Reply {
        let method = raw.method.clone();
        let target = raw.target.clone();
        let inbound_id = raw
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(REQUEST_ID_HEADER))
            .map(|(_, v)| v.clone());
        match Request::parse(raw, self.config.max_body_size) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                let request_id = self
                    .config
                    .enable_request_id
                    .then(|| RequestId::from_header_or_new(inbound_id.as_deref()));
                warn!(
                    method = %method,
                    target = %target,
                    error = %e,
                    "Rejected malformed request"
                );
                let reply = Reply::Full(self.error_response(Failure::Malformed(e.to_string())));
                stamp(reply, request_id)
            }
        }
    }

    /// Run one request through the full pipeline.
    pub fn dispatch(&self, request: Request) -> Reply {
        let started = Instant::now();
        let request_id = self
            .config
            .enable_request_id
            .then(|| RequestId::from_header_or_new(request.header(REQUEST_ID_HEADER)));
        let method = request.method().to_string();
        let path = request.path().to_string();

        let reply = match self.pipeline(request, request_id) {
            Ok(reply) => reply,
            Err(Early::Reply(reply)) => reply,
            Err(Early::Fail(failure)) => {
                log_failure(&failure, &method, &path, request_id);
                Reply::Full(self.error_response(failure))
            }
        };
        let reply = stamp(reply, request_id);

        info!(
            request_id = request_id.map(|id| id.to_string()),
            method = %method,
            path = %path,
            status = reply.status(),
            streaming = matches!(reply, Reply::Stream(_)),
            duration_us = started.elapsed().as_micros(),
            "Request complete"
        );
        reply
    }

    fn pipeline(&self, request: Request, request_id: Option<RequestId>) -> Result<Reply, Early> {
        let request = self.run_request_hooks(HookPhase::OnRequest, request)?;

        let routes = self.routes.load();
        let Some(found) = routes.find_for(&request) else {
            return Err(Failure::NotFound {
                method: request.method().to_string(),
                path: request.path().to_string(),
            }
            .into());
        };
        let route = found.route;
        let request = request.with_path_params(&found.path_params);

        let request = self.run_request_hooks(HookPhase::PreValidation, request)?;

        let handler = route.handler();
        let descriptors = handler.parameters();
        let args = self
            .resolver
            .resolve_all(descriptors, &request)
            .map_err(ResolutionError::into_combined_failure)?;

        let mut violations: Vec<FieldError> = Vec::new();
        for (descriptor, (_, value)) in descriptors.iter().zip(args.iter()) {
            let Some(schema) = descriptor.schema() else {
                continue;
            };
            if value.is_null() && !descriptor.required() {
                continue;
            }
            let prefix = [
                LocSegment::from(descriptor.source().as_str()),
                LocSegment::from(descriptor.name()),
            ];
            let mut errors = schema.validate(value, &prefix);
            redact_errors(&mut errors, descriptor.sensitive());
            violations.append(&mut errors);
        }
        if let Some(schema) = route.parameter_schema() {
            let mut errors = schema.validate(&BoundaryValue::Map(args.to_map()), &[]);
            redact_errors(&mut errors, false);
            violations.append(&mut errors);
        }
        if let Some(schema) = route.request_schema() {
            let body = request.body().cloned().unwrap_or_default();
            let mut errors = schema.validate(&body, &[LocSegment::from("body")]);
            redact_errors(&mut errors, false);
            violations.append(&mut errors);
        }
        if !violations.is_empty() {
            return Err(Failure::Validation(violations).into());
        }

        let request = self.run_request_hooks(HookPhase::PreHandler, request)?;

        let ctx = HandlerContext {
            request,
            args,
            background: self.background.clone(),
            request_id,
        };
        let handler_name = handler.name().to_string();
        let returned = match catch_unwind(AssertUnwindSafe(|| handler.call(ctx))) {
            Ok(Ok(returned)) => returned,
            Ok(Err(e)) => {
                return Err(match e.downcast::<Failure>() {
                    Ok(failure) => failure,
                    Err(e) => {
                        Failure::Internal(e.context(format!("handler '{handler_name}' failed")))
                    }
                }
                .into())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    request_id = request_id.map(|id| id.to_string()),
                    handler = %handler_name,
                    panic_message = %message,
                    "Handler panicked"
                );
                return Err(Failure::Internal(anyhow::anyhow!(
                    "handler '{handler_name}' panicked: {message}"
                ))
                .into());
            }
        };

        match convert(returned) {
            Reply::Full(response) => {
                if let Some(schema) = route.response_schema() {
                    if (200..300).contains(&response.status()) {
                        let errors = schema.validate(response.body(), &[]);
                        if !errors.is_empty() {
                            let summary: Vec<String> = errors
                                .iter()
                                .map(|e| format!("{}: {}", e.loc_string(), e.msg))
                                .collect();
                            return Err(Failure::Internal(anyhow::anyhow!(
                                "response from handler '{handler_name}' violates its schema: {}",
                                summary.join("; ")
                            ))
                            .into());
                        }
                    }
                }
                let response = self
                    .hooks
                    .run_response(HookPhase::OnResponse, response)
                    .map_err(Failure::Internal)?;
                Ok(Reply::Full(response))
            }
            stream @ Reply::Stream(_) => Ok(stream),
        }
    }

    fn run_request_hooks(&self, phase: HookPhase, request: Request) -> Result<Request, Early> {
        match self.hooks.run_request(phase, request) {
            Ok(HookResult::Continue(request)) => Ok(request),
            Ok(HookResult::ShortCircuit(response)) => Err(Early::Reply(Reply::Full(response))),
            Err(e) => Err(Failure::Internal(e.context(format!("{phase} hook failed"))).into()),
        }
    }

    fn error_response(&self, failure: Failure) -> Response {
        let (_, payload) = translate(&failure);
        let response = payload.into_response();
        match self.hooks.run_response(HookPhase::OnError, response.clone()) {
            Ok(rewritten) => rewritten,
            Err(e) => {
                error!(error = ?e, "onError hook failed, sending the untouched error response");
                response
            }
        }
    }
}

fn stamp(reply: Reply, request_id: Option<RequestId>) -> Reply {
    let Some(id) = request_id else {
        return reply;
    };
    match reply {
        Reply::Full(r) => Reply::Full(r.with_header(REQUEST_ID_HEADER, id.to_string())),
        Reply::Stream(s) => Reply::Stream(s.with_header(REQUEST_ID_HEADER, id.to_string())),
    }
}

fn log_failure(failure: &Failure, method: &str, path: &str, request_id: Option<RequestId>) {
    let request_id = request_id.map(|id| id.to_string());
    match failure {
        Failure::Internal(e) => error!(
            request_id,
            method = %method,
            path = %path,
            error = ?e,
            "Request failed with an internal error"
        ),
        Failure::Validation(errors) => debug!(
            request_id,
            method = %method,
            path = %path,
            violations = errors.len(),
            "Request failed validation"
        ),
        other => debug!(
            request_id,
            method = %method,
            path = %path,
            status = other.status(),
            error = %other,
            "Request rejected"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::response::CONTENT_TYPE_PROBLEM;

    fn app() -> App {
        App::default()
    }

    #[test]
    fn unknown_route_is_404_problem() {
        let reply = app().dispatch(Request::builder("GET", "/nope").build());
        assert_eq!(reply.status(), 404);
        assert_eq!(reply.header("content-type"), Some(CONTENT_TYPE_PROBLEM));
    }

    #[test]
    fn request_id_is_echoed_or_generated() {
        let app = app();
        let id = RequestId::new().to_string();
        let reply = app.dispatch(
            Request::builder("GET", "/nope")
                .header("X-Request-ID", id.clone())
                .build(),
        );
        assert_eq!(reply.header("x-request-id"), Some(id.as_str()));

        let reply = app.dispatch(Request::builder("GET", "/nope").build());
        assert_eq!(reply.header("x-request-id").map(str::len), Some(26));
    }

    #[test]
    fn request_id_can_be_disabled() {
        let config = ServerConfig::builder().enable_request_id(false).build().unwrap();
        let reply = App::new(config).dispatch(Request::builder("GET", "/nope").build());
        assert!(reply.header("x-request-id").is_none());
    }

    #[test]
    fn registration_swaps_in_new_table() {
        let app = app();
        let before = app.routes();
        app.route(
            "GET",
            "/ping",
            Arc::new(handler_fn(|_| Ok(BoundaryValue::from("pong")))),
        )
        .unwrap();
        assert_eq!(before.len(), 0);
        assert_eq!(app.routes().len(), 1);
        assert_eq!(app.dispatch(Request::builder("GET", "/ping").build()).status(), 200);
    }
}
