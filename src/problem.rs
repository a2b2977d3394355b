//! # Error Translator
//!
//! Maps every failure the dispatch layer can observe onto a stable problem payload
//! (`application/problem+json`).
//!
//! | Failure | Status | `type` | `title` |
//! |---------|--------|--------|---------|
//! | [`Failure::Validation`] | 422 | `.../validation-error` | `Request Validation Failed` |
//! | [`Failure::Malformed`] | 400 | `.../bad-request` | `Bad Request` |
//! | [`Failure::NotFound`] | 404 | `.../not-found` | `Not Found` |
//! | [`Failure::Internal`] | 500 | `.../internal-server-error` | `Internal Server Error` |
//!
//! Validation failures carry every field violation, never just the first. Internal failures
//! carry a fixed generic detail; the underlying error is for the logs only.
//!
//! ## Wire format
//!
//! ```json
//! {
//!   "type": "https://brrtrouter.dev/errors/validation-error",
//!   "title": "Request Validation Failed",
//!   "status": 422,
//!   "detail": "2 validation errors in request",
//!   "errors": [
//!     {"type": "missing", "loc": ["body", "email"], "msg": "Field required", "input": {}},
//!     {"type": "greater_than_equal", "loc": ["query", "age"], "msg": "Input should be greater than or equal to 18", "input": 5, "ctx": {"ge": 18}}
//!   ]
//! }
//! ```

use crate::response::{Response, CONTENT_TYPE_PROBLEM};
use crate::value::{BoundaryMap, BoundaryValue};
use serde::{Serialize, Serializer};
use std::fmt;

/// Base URI for problem `type` values.
pub const PROBLEM_TYPE_BASE: &str = "https://brrtrouter.dev/errors/";

/// Fixed detail for internal failures.
pub const INTERNAL_ERROR_DETAIL: &str = "An unexpected error occurred while processing the request";

/// One segment of a field location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocSegment {
    Key(String),
    Index(usize),
}

impl Serialize for LocSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LocSegment::Key(k) => serializer.serialize_str(k),
            LocSegment::Index(i) => serializer.serialize_u64(*i as u64),
        }
    }
}

impl From<&str> for LocSegment {
    fn from(s: &str) -> Self {
        LocSegment::Key(s.to_string())
    }
}

impl From<String> for LocSegment {
    fn from(s: String) -> Self {
        LocSegment::Key(s)
    }
}

impl From<usize> for LocSegment {
    fn from(i: usize) -> Self {
        LocSegment::Index(i)
    }
}

impl fmt::Display for LocSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocSegment::Key(k) => f.write_str(k),
            LocSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A single field violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub loc: Vec<LocSegment>,
    pub msg: String,
    pub input: BoundaryValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctx: Option<BoundaryMap>,
}

impl FieldError {
    pub fn new(
        error_type: impl Into<String>,
        loc: Vec<LocSegment>,
        msg: impl Into<String>,
        input: BoundaryValue,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            loc,
            msg: msg.into(),
            input,
            code: None,
            ctx: None,
        }
    }

    /// `missing` / "Field required".
    #[must_use]
    pub fn missing(loc: Vec<LocSegment>, input: BoundaryValue) -> Self {
        Self::new("missing", loc, "Field required", input)
    }

    #[must_use]
    pub fn with_ctx(mut self, key: &str, value: impl Into<BoundaryValue>) -> Self {
        self.ctx
            .get_or_insert_with(BoundaryMap::new)
            .insert(key, value);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Dotted location, e.g. `body.items.0.name`.
    #[must_use]
    pub fn loc_string(&self) -> String {
        self.loc
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Structured problem payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// Map projection with exactly `{type, title, status, detail, code?, errors}`.
    #[must_use]
    pub fn to_boundary(&self) -> BoundaryValue {
        let mut map = BoundaryMap::with_capacity(6);
        map.insert("type", self.problem_type.as_str());
        map.insert("title", self.title.as_str());
        map.insert("status", BoundaryValue::Int(i64::from(self.status)));
        map.insert("detail", self.detail.as_str());
        if let Some(code) = &self.code {
            map.insert("code", code.as_str());
        }
        map.insert(
            "errors",
            BoundaryValue::List(self.errors.iter().map(field_error_to_boundary).collect()),
        );
        BoundaryValue::Map(map)
    }

    /// Render as an `application/problem+json` response.
    #[must_use]
    pub fn into_response(self) -> Response {
        let status = self.status;
        let body = self.to_boundary();
        let base = Response::json(body).with_header("Content-Type", CONTENT_TYPE_PROBLEM);
        // Statuses here come from the fixed table above
        base.with_status(status).unwrap_or(base)
    }
}

fn field_error_to_boundary(e: &FieldError) -> BoundaryValue {
    let mut map = BoundaryMap::with_capacity(6);
    map.insert("type", e.error_type.as_str());
    map.insert(
        "loc",
        BoundaryValue::List(
            e.loc
                .iter()
                .map(|seg| match seg {
                    LocSegment::Key(k) => BoundaryValue::Str(k.clone()),
                    LocSegment::Index(i) => {
                        BoundaryValue::try_from(*i).unwrap_or(BoundaryValue::Int(i64::MAX))
                    }
                })
                .collect(),
        ),
    );
    map.insert("msg", e.msg.as_str());
    map.insert("input", e.input.clone());
    if let Some(code) = &e.code {
        map.insert("code", code.as_str());
    }
    if let Some(ctx) = &e.ctx {
        map.insert("ctx", ctx.clone());
    }
    BoundaryValue::Map(map)
}

/// Everything the dispatch layer turns into an error response.
#[derive(Debug)]
pub enum Failure {
    /// One or more field violations; all of them are reported
    Validation(Vec<FieldError>),
    /// The request could not be decoded at all
    Malformed(String),
    NotFound { method: String, path: String },
    /// Unexpected fault; detail stays server-side
    Internal(anyhow::Error),
}

impl Failure {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Failure::Validation(_) => 422,
            Failure::Malformed(_) => 400,
            Failure::NotFound { .. } => 404,
            Failure::Internal(_) => 500,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Validation(errors) => {
                write!(f, "{} validation error(s):", errors.len())?;
                for e in errors {
                    write!(f, " [{}: {}]", e.loc_string(), e.msg)?;
                }
                Ok(())
            }
            Failure::Malformed(detail) => write!(f, "malformed request: {detail}"),
            Failure::NotFound { method, path } => write!(f, "no route for {method} {path}"),
            Failure::Internal(e) => write!(f, "internal error: {e:#}"),
        }
    }
}

impl std::error::Error for Failure {}

fn problem_type(suffix: &str) -> String {
    format!("{PROBLEM_TYPE_BASE}{suffix}")
}

/// Translate a failure into its status and payload.
#[must_use]
pub fn translate(failure: &Failure) -> (u16, ValidationError) {
    let payload = match failure {
        Failure::Validation(errors) => ValidationError {
            problem_type: problem_type("validation-error"),
            title: "Request Validation Failed".to_string(),
            status: 422,
            detail: format!(
                "{} validation error{} in request",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ),
            code: Some("validation_error".to_string()),
            errors: errors.clone(),
        },
        Failure::Malformed(detail) => ValidationError {
            problem_type: problem_type("bad-request"),
            title: "Bad Request".to_string(),
            status: 400,
            detail: detail.clone(),
            code: Some("bad_request".to_string()),
            errors: Vec::new(),
        },
        Failure::NotFound { method, path } => ValidationError {
            problem_type: problem_type("not-found"),
            title: "Not Found".to_string(),
            status: 404,
            detail: format!("No route matches {method} {path}"),
            code: Some("not_found".to_string()),
            errors: Vec::new(),
        },
        Failure::Internal(_) => ValidationError {
            problem_type: problem_type("internal-server-error"),
            title: "Internal Server Error".to_string(),
            status: 500,
            detail: INTERNAL_ERROR_DETAIL.to_string(),
            code: Some("internal_error".to_string()),
            errors: Vec::new(),
        },
    };
    (payload.status, payload)
}
