//! # Handlers
//!
//! A [`Handler`] is the unit the router dispatches to. It declares its parameters as a
//! descriptor table, may veto a match through [`Handler::matches`], and returns anything that
//! converts into a [`HandlerReturn`].
//!
//! Most handlers are closures wrapped with [`handler_fn`]:
//!
//! ```rust,ignore
//! use brrtdispatch::handler::handler_fn;
//! use brrtdispatch::params::{ParamType, ParameterDescriptor, ParameterSource};
//!
//! let get_pet = handler_fn(|ctx| {
//!     let id: i64 = ctx.args.extract("id")?;
//!     Ok(BoundaryValue::from_json(serde_json::json!({"id": id, "name": "Rex"}))?)
//! })
//! .named("get_pet")
//! .param(ParameterDescriptor::builder("id", ParameterSource::Path).param_type(ParamType::Int).build()?);
//! ```

use crate::background::BackgroundTasks;
use crate::ids::RequestId;
use crate::params::{Arguments, ParameterDescriptor};
use crate::request::Request;
use crate::response::HandlerReturn;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Everything a handler receives for one invocation.
#[derive(Debug)]
pub struct HandlerContext {
    /// The request, with router-captured path parameters merged in
    pub request: Request,
    /// Resolved parameters in declaration order
    pub args: Arguments,
    pub background: BackgroundTasks,
    pub request_id: Option<RequestId>,
}

/// A request handler.
///
/// Errors returned from [`Handler::call`] that wrap a [`Failure`](crate::problem::Failure) are
/// translated by kind; any other error becomes a generic 500.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: HandlerContext) -> anyhow::Result<HandlerReturn>;

    /// Route-level veto. A `false` here lets the router try later routes.
    fn matches(&self, _request: &Request) -> bool {
        true
    }

    fn parameters(&self) -> &[ParameterDescriptor] {
        &[]
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

type Predicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Closure-backed [`Handler`].
pub struct FnHandler<F, R> {
    name: String,
    params: Vec<ParameterDescriptor>,
    predicate: Option<Predicate>,
    func: F,
    _ret: PhantomData<fn() -> R>,
}

/// Wrap a closure as a handler.
pub fn handler_fn<F, R>(func: F) -> FnHandler<F, R>
where
    F: Fn(HandlerContext) -> anyhow::Result<R> + Send + Sync,
    R: Into<HandlerReturn>,
{
    FnHandler {
        name: "anonymous".to_string(),
        params: Vec::new(),
        predicate: None,
        func,
        _ret: PhantomData,
    }
}

impl<F, R> FnHandler<F, R> {
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a parameter descriptor. Resolution follows append order.
    #[must_use]
    pub fn param(mut self, descriptor: ParameterDescriptor) -> Self {
        self.params.push(descriptor);
        self
    }

    #[must_use]
    pub fn params(mut self, descriptors: impl IntoIterator<Item = ParameterDescriptor>) -> Self {
        self.params.extend(descriptors);
        self
    }

    /// Only match requests for which `predicate` returns `true`.
    #[must_use]
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl<F, R> fmt::Debug for FnHandler<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("name", &self.name)
            .field("params", &self.params.len())
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

impl<F, R> Handler for FnHandler<F, R>
where
    F: Fn(HandlerContext) -> anyhow::Result<R> + Send + Sync,
    R: Into<HandlerReturn>,
{
    fn call(&self, ctx: HandlerContext) -> anyhow::Result<HandlerReturn> {
        (self.func)(ctx).map(Into::into)
    }

    fn matches(&self, request: &Request) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(request))
    }

    fn parameters(&self) -> &[ParameterDescriptor] {
        &self.params
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSource;
    use crate::value::BoundaryValue;

    fn ctx(request: Request) -> HandlerContext {
        HandlerContext {
            request,
            args: Arguments::default(),
            background: BackgroundTasks::new(),
            request_id: None,
        }
    }

    #[test]
    fn closure_return_is_converted() {
        let h = handler_fn(|_| Ok(BoundaryValue::Int(7))).named("seven");
        assert_eq!(h.name(), "seven");
        let out = h.call(ctx(Request::builder("GET", "/").build())).unwrap();
        assert!(matches!(out, HandlerReturn::Value(BoundaryValue::Int(7))));
    }

    #[test]
    fn predicate_vetoes() {
        let h = handler_fn(|_| Ok(BoundaryValue::Null))
            .when(|r: &Request| r.header("x-beta").is_some());
        assert!(!h.matches(&Request::builder("GET", "/").build()));
        assert!(h.matches(&Request::builder("GET", "/").header("X-Beta", "1").build()));
    }

    #[test]
    fn parameters_keep_order() {
        let h = handler_fn(|_| Ok(BoundaryValue::Null))
            .param(ParameterDescriptor::builder("a", ParameterSource::Query).build().unwrap())
            .param(ParameterDescriptor::builder("b", ParameterSource::Path).build().unwrap());
        let names: Vec<_> = h.parameters().iter().map(ParameterDescriptor::name).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
