//! # brrtdispatch
//!
//! Request-dispatch core for services whose handlers may live on the far side of a language or
//! process boundary. Every value that crosses that boundary is a [`BoundaryValue`]; requests,
//! arguments, responses and configuration are all projected into it.
//!
//! ## Architecture
//!
//! - **[`value`]** / **[`codec`]** - the boundary value model and its wire frame
//! - **[`request`]** - decoded requests and raw transport input
//! - **[`router`]** - ordered route table with per-handler predicates
//! - **[`params`]** - parameter descriptors and resolution against a request
//! - **[`validator`]** - JSON Schema checks producing field errors
//! - **[`response`]** - handler return values and their conversion to replies
//! - **[`problem`]** - translating failures into `application/problem+json`
//! - **[`streaming`]** / **[`sse`]** - chunked, file and event-stream replies
//! - **[`lifecycle`]** - request and response hooks per dispatch phase
//! - **[`handler`]** / **[`boundary`]** - native and boundary-crossing handlers
//! - **[`dispatcher`]** - the [`App`] pipeline tying it all together
//! - **[`client`]** - in-process test client
//! - **[`config`]** / **[`runtime_config`]** / **[`logging`]** - settings and observability
//!
//! ## Dispatch flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant T as Transport
//!     participant A as App
//!     participant R as RouteTable
//!     participant P as ParameterResolver
//!     participant H as Handler
//!     T->>A: dispatch_raw(RawRequest)
//!     A->>A: onRequest hooks
//!     A->>R: find_for(&Request)
//!     R-->>A: RouteMatch
//!     A->>A: preValidation hooks
//!     A->>P: resolve_all(descriptors, &Request)
//!     A->>A: schema checks
//!     A->>A: preHandler hooks
//!     A->>H: call(HandlerContext)
//!     H-->>A: HandlerReturn
//!     A->>A: convert + onResponse hooks
//!     A-->>T: Reply
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use brrtdispatch::{handler_fn, App, ParamType, ParameterDescriptor, ParameterSource, TestClient};
//! use std::sync::Arc;
//!
//! let app = App::default();
//! let id = ParameterDescriptor::builder("id", ParameterSource::Path)
//!     .param_type(ParamType::Int)
//!     .build()?;
//! app.route(
//!     "GET",
//!     "/items/{id}",
//!     Arc::new(handler_fn(|ctx| Ok(ctx.args.get("id").cloned().unwrap_or_default())).param(id)),
//! )?;
//!
//! let client = TestClient::new(app);
//! assert_eq!(client.get("/items/7")?.text()?, "7");
//! ```

pub mod background;
pub mod boundary;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod ids;
pub mod lifecycle;
pub mod logging;
pub mod params;
pub mod problem;
pub mod request;
pub mod response;
pub mod router;
pub mod runtime_config;
pub mod sse;
pub mod static_files;
pub mod streaming;
pub mod validator;
pub mod value;

pub use boundary::ForeignHandler;
pub use client::{ClientError, TestClient, TestResponse};
pub use config::{ConfigError, ServerConfig};
pub use dispatcher::App;
pub use handler::{handler_fn, Handler, HandlerContext};
pub use lifecycle::{HookPhase, HookResult, LifecycleHook, LifecycleHooks};
pub use params::{Arguments, ParamType, ParameterDescriptor, ParameterResolver, ParameterSource};
pub use problem::{Failure, FieldError, LocSegment, ValidationError};
pub use request::{RawRequest, Request};
pub use response::{HandlerReturn, Reply, Response};
pub use router::{RouteError, RouteTable};
pub use streaming::StreamingResponse;
pub use value::{BoundaryMap, BoundaryValue};
