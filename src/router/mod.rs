//! # Router Module
//!
//! Maps `(method, path)` to a registered handler using an ordered, persistent route table.
//!
//! ## Matching
//!
//! - The method is compared case-insensitively (`get`, `Get` and `GET` are the same route).
//! - Any query string is stripped from the incoming path. Registered paths had theirs stripped
//!   at registration.
//! - Routes are tried in registration order. A route is eligible when method and path agree and
//!   its handler's [`Handler::matches`](crate::handler::Handler::matches) predicate accepts the
//!   request. The first eligible route wins.
//! - Static paths match by string equality. `{name}` segments match one non-empty segment and
//!   `{*name}` as the last segment captures the rest of the path.
//!
//! ## Persistence
//!
//! `add*` returns a new [`RouteTable`]; the receiver is never modified. Route entries are shared
//! between tables through `Arc`, so registering is cheap and lookups against an old snapshot
//! stay valid.
//!
//! ## Example
//!
//! ```rust,ignore
//! use brrtdispatch::router::RouteTable;
//!
//! let table = RouteTable::new()
//!     .add("get", "/pets/{id}", Arc::new(get_pet))?
//!     .add("POST", "/pets", Arc::new(create_pet))?;
//!
//! let m = table.find("GET", "/pets/42?verbose=1").expect("route");
//! assert_eq!(m.path_param("id"), Some("42"));
//! ```

mod core;

pub use core::{Route, RouteError, RouteKind, RouteMatch, RouteSchemas, RouteTable};
