//! # Parameter Resolution
//!
//! Handlers declare their parameters up front as a table of [`ParameterDescriptor`]s; nothing
//! is discovered by reflection. For every request, [`ParameterResolver::resolve`] walks that
//! table in order and produces [`Arguments`] or the first [`ResolutionError`].
//!
//! ## Lookup rules
//!
//! | Source | Raw value |
//! |--------|-----------|
//! | `Path` | path parameter (router captures included) |
//! | `Query` | last occurrence; every occurrence for `List` types |
//! | `Header` | alias, then name, then name with `_` → `-`; case-insensitive |
//! | `Cookie` | cookie value |
//! | `Body` | the whole decoded body |
//! | `Implicit` | the request's dependency bag |
//!
//! `List` typed parameters split every raw occurrence on commas, whatever the source: `?tags=a,b`,
//! `?tags=a&tags=b` and a `X-Tags: a, b` header all yield `["a", "b"]`. Items are trimmed and
//! empty items dropped.
//!
//! `File` typed parameters read from the request's uploaded files regardless of source.
//!
//! ## Absent values
//!
//! 1. default factory → called fresh on every resolution
//! 2. literal default → used as-is (falsy literals are still defaults)
//! 3. required → `MissingRequiredParameter`
//! 4. optional → `Null`
//!
//! ## Example
//!
//! ```rust,ignore
//! use brrtdispatch::params::{ParamType, ParameterDescriptor, ParameterResolver, ParameterSource};
//!
//! let limit = ParameterDescriptor::builder("limit", ParameterSource::Query)
//!     .param_type(ParamType::Int)
//!     .default_value(20)
//!     .build()?;
//! let args = ParameterResolver::new().resolve(&[limit], &request)?;
//! let limit: i64 = args.extract("limit")?;
//! ```

mod descriptor;
mod resolver;
#[cfg(test)]
mod tests;

pub use descriptor::{
    DefaultFactory, DefaultValue, ParamType, ParameterDescriptor, ParameterDescriptorBuilder,
    ParameterSource,
};
pub use resolver::{Arguments, CustomResolver, ParameterResolver, ResolutionError};
