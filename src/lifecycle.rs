//! # Lifecycle Hooks
//!
//! Hooks run at five fixed points of a dispatch:
//!
//! | Phase | Runs | May |
//! |-------|------|-----|
//! | `onRequest` | before routing | rewrite the request or short-circuit |
//! | `preValidation` | after routing, before parameter resolution | rewrite or short-circuit |
//! | `preHandler` | after validation, before the handler | rewrite or short-circuit |
//! | `onResponse` | on every successful full response | rewrite the response |
//! | `onError` | on every error response | rewrite the response |
//!
//! Hooks of one phase run in registration order. The first `ShortCircuit` ends the phase and
//! its response is sent as-is. A hook returning `Err` fails the dispatch with a generic 500.
//! Streaming replies skip `onResponse`.

use crate::request::Request;
use crate::response::Response;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a request-phase hook.
#[derive(Debug)]
pub enum HookResult<T> {
    /// Carry on with the (possibly rewritten) value
    Continue(T),
    /// Stop here and reply with this response
    ShortCircuit(Response),
}

/// One lifecycle hook. Request-phase and response-phase behavior default to pass-through.
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_request(&self, request: Request) -> anyhow::Result<HookResult<Request>> {
        Ok(HookResult::Continue(request))
    }

    fn on_response(&self, response: Response) -> anyhow::Result<Response> {
        Ok(response)
    }
}

pub type HookRef = Arc<dyn LifecycleHook>;

struct RequestHookFn<F> {
    name: String,
    func: F,
}

impl<F> LifecycleHook for RequestHookFn<F>
where
    F: Fn(Request) -> anyhow::Result<HookResult<Request>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_request(&self, request: Request) -> anyhow::Result<HookResult<Request>> {
        (self.func)(request)
    }
}

struct ResponseHookFn<F> {
    name: String,
    func: F,
}

impl<F> LifecycleHook for ResponseHookFn<F>
where
    F: Fn(Response) -> anyhow::Result<Response> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_response(&self, response: Response) -> anyhow::Result<Response> {
        (self.func)(response)
    }
}

/// Closure-backed request-phase hook.
pub fn request_hook<F>(name: impl Into<String>, func: F) -> HookRef
where
    F: Fn(Request) -> anyhow::Result<HookResult<Request>> + Send + Sync + 'static,
{
    Arc::new(RequestHookFn {
        name: name.into(),
        func,
    })
}

/// Closure-backed response-phase hook.
pub fn response_hook<F>(name: impl Into<String>, func: F) -> HookRef
where
    F: Fn(Response) -> anyhow::Result<Response> + Send + Sync + 'static,
{
    Arc::new(ResponseHookFn {
        name: name.into(),
        func,
    })
}

/// The five lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookPhase {
    OnRequest,
    PreValidation,
    PreHandler,
    OnResponse,
    OnError,
}

impl HookPhase {
    /// Wire name used by [`LifecycleHooks::projection`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::OnRequest => "onRequest",
            HookPhase::PreValidation => "preValidation",
            HookPhase::PreHandler => "preHandler",
            HookPhase::OnResponse => "onResponse",
            HookPhase::OnError => "onError",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered hooks, grouped by phase. Built with consuming setters.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    on_request: Vec<HookRef>,
    pre_validation: Vec<HookRef>,
    pre_handler: Vec<HookRef>,
    on_response: Vec<HookRef>,
    on_error: Vec<HookRef>,
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |hooks: &[HookRef]| {
            hooks
                .iter()
                .map(|h| h.name().to_string())
                .collect::<Vec<_>>()
        };
        f.debug_struct("LifecycleHooks")
            .field("on_request", &names(&self.on_request))
            .field("pre_validation", &names(&self.pre_validation))
            .field("pre_handler", &names(&self.pre_handler))
            .field("on_response", &names(&self.on_response))
            .field("on_error", &names(&self.on_error))
            .finish()
    }
}

impl LifecycleHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_request(mut self, hook: HookRef) -> Self {
        self.on_request.push(hook);
        self
    }

    #[must_use]
    pub fn pre_validation(mut self, hook: HookRef) -> Self {
        self.pre_validation.push(hook);
        self
    }

    #[must_use]
    pub fn pre_handler(mut self, hook: HookRef) -> Self {
        self.pre_handler.push(hook);
        self
    }

    #[must_use]
    pub fn on_response(mut self, hook: HookRef) -> Self {
        self.on_response.push(hook);
        self
    }

    #[must_use]
    pub fn on_error(mut self, hook: HookRef) -> Self {
        self.on_error.push(hook);
        self
    }

    #[must_use]
    pub fn hooks(&self, phase: HookPhase) -> &[HookRef] {
        match phase {
            HookPhase::OnRequest => &self.on_request,
            HookPhase::PreValidation => &self.pre_validation,
            HookPhase::PreHandler => &self.pre_handler,
            HookPhase::OnResponse => &self.on_response,
            HookPhase::OnError => &self.on_error,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projection().is_empty()
    }

    /// Phase name to registered hooks. Phases without hooks are absent.
    #[must_use]
    pub fn projection(&self) -> BTreeMap<&'static str, Vec<HookRef>> {
        [
            HookPhase::OnRequest,
            HookPhase::PreValidation,
            HookPhase::PreHandler,
            HookPhase::OnResponse,
            HookPhase::OnError,
        ]
        .into_iter()
        .filter(|phase| !self.hooks(*phase).is_empty())
        .map(|phase| (phase.as_str(), self.hooks(phase).to_vec()))
        .collect()
    }

    /// Run a request phase. Response phases pass the request through untouched.
    pub fn run_request(
        &self,
        phase: HookPhase,
        mut request: Request,
    ) -> anyhow::Result<HookResult<Request>> {
        for hook in self.hooks(phase) {
            match hook.on_request(request)? {
                HookResult::Continue(next) => request = next,
                HookResult::ShortCircuit(response) => {
                    debug!(
                        phase = %phase,
                        hook = %hook.name(),
                        status = response.status(),
                        "Lifecycle hook short-circuited"
                    );
                    return Ok(HookResult::ShortCircuit(response));
                }
            }
        }
        Ok(HookResult::Continue(request))
    }

    /// Run a response phase over `response`.
    pub fn run_response(
        &self,
        phase: HookPhase,
        mut response: Response,
    ) -> anyhow::Result<Response> {
        for hook in self.hooks(phase) {
            response = hook.on_response(response)?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough(name: &str) -> HookRef {
        request_hook(name, |r| Ok(HookResult::Continue(r)))
    }

    #[test]
    fn projection_only_lists_registered_phases() {
        assert!(LifecycleHooks::new().projection().is_empty());

        let hooks = LifecycleHooks::new().on_request(passthrough("log"));
        let projection = hooks.projection();
        assert_eq!(projection.keys().copied().collect::<Vec<_>>(), ["onRequest"]);
        assert_eq!(projection["onRequest"][0].name(), "log");
    }

    #[test]
    fn projection_returns_the_same_hooks() {
        let on_req = passthrough("a");
        let on_err = response_hook("b", Ok);
        let hooks = LifecycleHooks::new()
            .on_request(Arc::clone(&on_req))
            .pre_validation(passthrough("c"))
            .pre_handler(passthrough("d"))
            .on_response(response_hook("e", Ok))
            .on_error(Arc::clone(&on_err));
        let projection = hooks.projection();
        assert_eq!(projection.len(), 5);
        assert!(Arc::ptr_eq(&projection["onRequest"][0], &on_req));
        assert!(Arc::ptr_eq(&projection["onError"][0], &on_err));
    }

    #[test]
    fn first_short_circuit_wins() {
        let hooks = LifecycleHooks::new()
            .pre_handler(request_hook("deny", |_| {
                Ok(HookResult::ShortCircuit(Response::new(403)?))
            }))
            .pre_handler(request_hook("never", |_| anyhow::bail!("must not run")));
        let out = hooks
            .run_request(HookPhase::PreHandler, Request::builder("GET", "/").build())
            .unwrap();
        assert!(matches!(out, HookResult::ShortCircuit(r) if r.status() == 403));
    }

    #[test]
    fn response_hooks_chain_in_order() {
        let hooks = LifecycleHooks::new()
            .on_response(response_hook("one", |r| Ok(r.with_header("x-order", "1"))))
            .on_response(response_hook("two", |r| {
                let prev = r.header("x-order").unwrap_or_default().to_string();
                Ok(r.with_header("x-order", format!("{prev},2")))
            }));
        let out = hooks
            .run_response(HookPhase::OnResponse, Response::text("ok"))
            .unwrap();
        assert_eq!(out.header("x-order"), Some("1,2"));
    }
}
