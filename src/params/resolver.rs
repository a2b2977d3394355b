use super::descriptor::{DefaultValue, ParamType, ParameterDescriptor, ParameterSource};
use crate::problem::{Failure, FieldError};
use crate::request::Request;
use crate::validator::{is_sensitive_name, REDACTED};
use crate::value::{BoundaryMap, BoundaryValue, FromBoundary};
use anyhow::Context;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Resolves parameters whose type is [`ParamType::Custom`].
pub trait CustomResolver: Send + Sync {
    fn resolve(
        &self,
        descriptor: &ParameterDescriptor,
        request: &Request,
    ) -> anyhow::Result<BoundaryValue>;
}

impl<F> CustomResolver for F
where
    F: Fn(&ParameterDescriptor, &Request) -> anyhow::Result<BoundaryValue> + Send + Sync,
{
    fn resolve(
        &self,
        descriptor: &ParameterDescriptor,
        request: &Request,
    ) -> anyhow::Result<BoundaryValue> {
        self(descriptor, request)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionError {
    MissingRequiredParameter {
        name: String,
        source: ParameterSource,
    },
    /// Custom type with no registered resolver
    UnresolvableParameterType { name: String, type_name: String },
    InvalidParameterValue {
        name: String,
        source: ParameterSource,
        expected: ParamType,
        /// Already redacted when the parameter is sensitive
        input: BoundaryValue,
    },
    CustomResolverFailed {
        name: String,
        type_name: String,
        message: String,
    },
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::MissingRequiredParameter { name, source } => {
                write!(f, "missing required {source} parameter '{name}'")
            }
            ResolutionError::UnresolvableParameterType { name, type_name } => write!(
                f,
                "no resolver registered for type '{type_name}' of parameter '{name}'"
            ),
            ResolutionError::InvalidParameterValue {
                name,
                source,
                expected,
                ..
            } => write!(f, "{source} parameter '{name}' is not a valid {expected}"),
            ResolutionError::CustomResolverFailed {
                name,
                type_name,
                message,
            } => write!(
                f,
                "resolver for type '{type_name}' failed on parameter '{name}': {message}"
            ),
        }
    }
}

impl std::error::Error for ResolutionError {}

fn parsing_error(expected: &ParamType) -> (&'static str, &'static str) {
    match expected {
        ParamType::Int => (
            "int_parsing",
            "Input should be a valid integer, unable to parse string as an integer",
        ),
        ParamType::Float => (
            "float_parsing",
            "Input should be a valid number, unable to parse string as a number",
        ),
        ParamType::Bool => (
            "bool_parsing",
            "Input should be a valid boolean, unable to interpret input",
        ),
        ParamType::String => ("string_type", "Input should be a valid string"),
        ParamType::List(_) => ("list_type", "Input should be a valid list"),
        ParamType::Map => ("dict_type", "Input should be a valid dictionary"),
        ParamType::Bytes => ("bytes_type", "Input should be a valid bytes value"),
        ParamType::File => ("file_type", "Input should be an uploaded file"),
        ParamType::Any | ParamType::Custom(_) => ("type_error", "Input has an unexpected type"),
    }
}

impl ResolutionError {
    /// Missing and invalid values are client errors (422); the rest are server faults.
    #[must_use]
    pub fn into_failure(self) -> Failure {
        match self {
            ResolutionError::MissingRequiredParameter { name, source } => {
                Failure::Validation(vec![FieldError::missing(
                    vec![source.as_str().into(), name.into()],
                    BoundaryValue::Null,
                )])
            }
            ResolutionError::InvalidParameterValue {
                name,
                source,
                expected,
                input,
            } => {
                let (error_type, msg) = parsing_error(&expected);
                Failure::Validation(vec![FieldError::new(
                    error_type,
                    vec![source.as_str().into(), name.into()],
                    msg,
                    input,
                )])
            }
            other => Failure::Internal(anyhow::Error::new(other)),
        }
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ResolutionError::MissingRequiredParameter { .. }
                | ResolutionError::InvalidParameterValue { .. }
        )
    }

    /// Fold several failures into one. Any server-side fault wins over client errors;
    /// otherwise every field error is kept.
    #[must_use]
    pub fn into_combined_failure(errors: Vec<ResolutionError>) -> Failure {
        if let Some(fault) = errors.iter().position(|e| !e.is_client_error()) {
            return errors.into_iter().nth(fault).map_or_else(
                || Failure::Validation(Vec::new()),
                ResolutionError::into_failure,
            );
        }
        let mut fields = Vec::with_capacity(errors.len());
        for error in errors {
            if let Failure::Validation(mut errs) = error.into_failure() {
                fields.append(&mut errs);
            }
        }
        Failure::Validation(fields)
    }
}

/// Resolved arguments in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<(String, BoundaryValue)>,
}

impl Arguments {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoundaryValue> {
        self.values.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Typed access for handlers.
    pub fn extract<T: FromBoundary>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .get(name)
            .with_context(|| format!("no argument named '{name}'"))?;
        T::from_boundary(value).with_context(|| format!("argument '{name}'"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoundaryValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Positional view.
    #[must_use]
    pub fn to_list(&self) -> Vec<BoundaryValue> {
        self.values.iter().map(|(_, v)| v.clone()).collect()
    }

    /// `{name: value}` view, used for parameter-schema validation and boundary crossing.
    #[must_use]
    pub fn to_map(&self) -> BoundaryMap {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

enum Raw {
    Missing,
    Text(String),
    Texts(Vec<String>),
    Value(BoundaryValue),
}

/// Turns a request plus descriptors into an argument list.
///
/// Holds only the custom-resolver registry; every call works on its own buffers.
#[derive(Clone, Default)]
pub struct ParameterResolver {
    custom: HashMap<String, Arc<dyn CustomResolver>>,
}

impl fmt::Debug for ParameterResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterResolver")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ParameterResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver for `ParamType::Custom(type_name)`.
    #[must_use]
    pub fn with_custom<R>(mut self, type_name: impl Into<String>, resolver: R) -> Self
    where
        R: CustomResolver + 'static,
    {
        self.custom.insert(type_name.into(), Arc::new(resolver));
        self
    }

    #[must_use]
    pub fn has_custom(&self, type_name: &str) -> bool {
        self.custom.contains_key(type_name)
    }

    /// Resolve every descriptor in order. The first failure aborts the whole resolution.
    pub fn resolve(
        &self,
        descriptors: &[ParameterDescriptor],
        request: &Request,
    ) -> Result<Arguments, ResolutionError> {
        let mut values = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let value = self.resolve_one(descriptor, request).inspect_err(|e| {
                debug!(
                    parameter = %descriptor.name(),
                    source = %descriptor.source(),
                    error = %e,
                    "Parameter resolution failed"
                );
            })?;
            values.push((descriptor.name().to_string(), value));
        }
        Ok(Arguments { values })
    }

    /// Like [`resolve`](Self::resolve) but keeps going, returning every failure.
    ///
    /// The dispatcher uses this so a request with several bad parameters gets one response
    /// listing all of them.
    pub fn resolve_all(
        &self,
        descriptors: &[ParameterDescriptor],
        request: &Request,
    ) -> Result<Arguments, Vec<ResolutionError>> {
        let mut values = Vec::with_capacity(descriptors.len());
        let mut errors = Vec::new();
        for descriptor in descriptors {
            match self.resolve_one(descriptor, request) {
                Ok(value) => values.push((descriptor.name().to_string(), value)),
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(Arguments { values })
        } else {
            debug!(failures = errors.len(), "Parameter resolution failed");
            Err(errors)
        }
    }

    fn resolve_one(
        &self,
        descriptor: &ParameterDescriptor,
        request: &Request,
    ) -> Result<BoundaryValue, ResolutionError> {
        if let ParamType::Custom(type_name) = descriptor.param_type() {
            let resolver =
                self.custom
                    .get(type_name)
                    .ok_or_else(|| ResolutionError::UnresolvableParameterType {
                        name: descriptor.name().to_string(),
                        type_name: type_name.clone(),
                    })?;
            return resolver.resolve(descriptor, request).map_err(|e| {
                ResolutionError::CustomResolverFailed {
                    name: descriptor.name().to_string(),
                    type_name: type_name.clone(),
                    message: format!("{e:#}"),
                }
            });
        }

        match lookup(descriptor, request) {
            Raw::Missing => match descriptor.default() {
                DefaultValue::Factory(factory) => Ok(factory()),
                DefaultValue::Literal(value) => Ok(value.clone()),
                DefaultValue::None if descriptor.required() => {
                    Err(ResolutionError::MissingRequiredParameter {
                        name: descriptor.name().to_string(),
                        source: descriptor.source(),
                    })
                }
                DefaultValue::None => Ok(BoundaryValue::Null),
            },
            raw => coerce(descriptor, raw),
        }
    }
}

fn lookup(descriptor: &ParameterDescriptor, request: &Request) -> Raw {
    let key = descriptor.lookup_key();
    let wants_list = matches!(descriptor.param_type(), ParamType::List(_));

    if *descriptor.param_type() == ParamType::File {
        return request
            .file(key)
            .map_or(Raw::Missing, |f| Raw::Value(f.to_boundary()));
    }

    match descriptor.source() {
        ParameterSource::Path => request
            .path_param(key)
            .map_or(Raw::Missing, |v| Raw::Text(v.to_string())),
        ParameterSource::Query if wants_list => {
            let all = request.query_all(key);
            if all.is_empty() {
                Raw::Missing
            } else {
                Raw::Texts(all.to_vec())
            }
        }
        ParameterSource::Query => request
            .query(key)
            .map_or(Raw::Missing, |v| Raw::Text(v.to_string())),
        ParameterSource::Header => descriptor
            .header_candidates()
            .iter()
            .find_map(|name| request.header(name))
            .map_or(Raw::Missing, |v| Raw::Text(v.to_string())),
        ParameterSource::Cookie => request
            .cookie(key)
            .map_or(Raw::Missing, |v| Raw::Text(v.to_string())),
        ParameterSource::Body => request
            .body()
            .map_or(Raw::Missing, |v| Raw::Value(v.clone())),
        ParameterSource::Implicit => request
            .dependency(key)
            .map_or(Raw::Missing, |v| Raw::Value(v.clone())),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Comma-separated items of one raw occurrence, trimmed, empties dropped.
fn list_items(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn coerce_text(text: &str, ty: &ParamType) -> Option<BoundaryValue> {
    match ty {
        ParamType::Any | ParamType::String => Some(BoundaryValue::Str(text.to_string())),
        ParamType::Int => text.trim().parse::<i64>().ok().map(BoundaryValue::Int),
        ParamType::Float => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(BoundaryValue::Float),
        ParamType::Bool => parse_bool(text).map(BoundaryValue::Bool),
        ParamType::List(inner) => list_items(text)
            .map(|part| coerce_text(part, inner))
            .collect::<Option<Vec<_>>>()
            .map(BoundaryValue::List),
        ParamType::Map => serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .filter(serde_json::Value::is_object)
            .and_then(|v| BoundaryValue::from_json(v).ok()),
        ParamType::Bytes => Some(BoundaryValue::Bytes(Bytes::copy_from_slice(text.as_bytes()))),
        ParamType::File | ParamType::Custom(_) => None,
    }
}

/// Structured values are checked, not coerced; the one widening is an exact `Int` to `Float`.
fn check_value(value: BoundaryValue, ty: &ParamType) -> Option<BoundaryValue> {
    const MAX_EXACT: i64 = 1 << 53;
    match (ty, value) {
        (ParamType::Any, v) => Some(v),
        (ParamType::String, v @ BoundaryValue::Str(_)) => Some(v),
        (ParamType::Int, v @ BoundaryValue::Int(_)) => Some(v),
        (ParamType::Float, v @ BoundaryValue::Float(_)) => Some(v),
        (ParamType::Float, BoundaryValue::Int(i)) if (-MAX_EXACT..=MAX_EXACT).contains(&i) => {
            Some(BoundaryValue::Float(i as f64))
        }
        (ParamType::Bool, v @ BoundaryValue::Bool(_)) => Some(v),
        (ParamType::List(inner), BoundaryValue::List(items)) => items
            .into_iter()
            .map(|item| check_value(item, inner))
            .collect::<Option<Vec<_>>>()
            .map(BoundaryValue::List),
        (ParamType::Map | ParamType::File, v @ BoundaryValue::Map(_)) => Some(v),
        (ParamType::Bytes, v @ BoundaryValue::Bytes(_)) => Some(v),
        _ => None,
    }
}

fn coerce(descriptor: &ParameterDescriptor, raw: Raw) -> Result<BoundaryValue, ResolutionError> {
    let ty = descriptor.param_type();
    let (coerced, input) = match raw {
        Raw::Text(text) => (coerce_text(&text, ty), BoundaryValue::Str(text)),
        Raw::Texts(texts) => {
            let inner = match ty {
                ParamType::List(inner) => inner.as_ref(),
                other => other,
            };
            let coerced = texts
                .iter()
                .flat_map(|t| list_items(t))
                .map(|part| coerce_text(part, inner))
                .collect::<Option<Vec<_>>>()
                .map(BoundaryValue::List);
            (coerced, BoundaryValue::from(texts))
        }
        Raw::Value(value) => (check_value(value.clone(), ty), value),
        Raw::Missing => (None, BoundaryValue::Null),
    };
    coerced.ok_or_else(|| ResolutionError::InvalidParameterValue {
        name: descriptor.name().to_string(),
        source: descriptor.source(),
        expected: ty.clone(),
        input: if descriptor.sensitive() || is_sensitive_name(descriptor.name()) {
            BoundaryValue::Str(REDACTED.to_string())
        } else {
            input
        },
    })
}
