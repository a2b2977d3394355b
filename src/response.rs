//! # Response Converter
//!
//! Handlers may return a finished [`Response`], a bare [`BoundaryValue`] or a
//! [`StreamingResponse`]. [`convert`] normalizes all of them into a [`Reply`].
//!
//! ## Conversion rules (first match wins)
//!
//! | Handler returned | Status | Content-Type | Body |
//! |------------------|--------|--------------|------|
//! | `Response` | unchanged | unchanged | unchanged |
//! | `Null` | 204 | none | empty |
//! | `Str` | 200 | `text/plain; charset=utf-8` | the string, even when empty |
//! | `Map` / `List` | 200 | `application/json` | the value |
//! | `Int` / `Float` / `Bool` | 200 | `application/json` | `{"result": value}` |
//! | `Bytes` | 200 | `application/octet-stream` | raw bytes |
//!
//! `Response` values are immutable: `with_header`, `with_cookie` and `with_status` return a new
//! response and leave the receiver untouched.

use crate::request::HeaderVec;
use crate::streaming::StreamingResponse;
use crate::value::{BoundaryMap, BoundaryValue, ProjectionError};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
pub const CONTENT_TYPE_PROBLEM: &str = "application/problem+json";
pub const CONTENT_TYPE_OCTET: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    /// Status outside 100..=599
    InvalidStatus(u16),
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseError::InvalidStatus(code) => {
                write!(f, "status code {code} is outside the range 100..=599")
            }
        }
    }
}

impl std::error::Error for ResponseError {}

fn check_status(status: u16) -> Result<u16, ResponseError> {
    if (100..=599).contains(&status) {
        Ok(status)
    } else {
        Err(ResponseError::InvalidStatus(status))
    }
}

/// A `Set-Cookie` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            max_age: None,
            http_only: false,
            secure: false,
        }
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    #[must_use]
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Render as a `Set-Cookie` header value.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(age) = self.max_age {
            out.push_str(&format!("; Max-Age={age}"));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out
    }
}

/// Canonical, immutable response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: u16,
    headers: HeaderVec,
    body: BoundaryValue,
    cookies: Vec<SetCookie>,
}

impl Response {
    /// Empty-bodied response with the given status.
    pub fn new(status: u16) -> Result<Self, ResponseError> {
        Ok(Self {
            status: check_status(status)?,
            headers: HeaderVec::new(),
            body: BoundaryValue::Null,
            cookies: Vec::new(),
        })
    }

    /// 200 with a JSON body.
    pub fn json(body: impl Into<BoundaryValue>) -> Self {
        Self::ok_with(body.into(), CONTENT_TYPE_JSON)
    }

    /// 200 with a plain-text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::ok_with(BoundaryValue::Str(body.into()), CONTENT_TYPE_TEXT)
    }

    /// 204 with no body and no content type.
    #[must_use]
    pub fn no_content() -> Self {
        Self {
            status: 204,
            headers: HeaderVec::new(),
            body: BoundaryValue::Null,
            cookies: Vec::new(),
        }
    }

    fn ok_with(body: BoundaryValue, content_type: &str) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("Content-Type"), content_type.to_string()));
        Self {
            status: 200,
            headers,
            body,
            cookies: Vec::new(),
        }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Header value by name, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn headers(&self) -> &[(Arc<str>, String)] {
        &self.headers
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    #[must_use]
    pub fn body(&self) -> &BoundaryValue {
        &self.body
    }

    #[must_use]
    pub fn cookies(&self) -> &[SetCookie] {
        &self.cookies
    }

    /// New response with `name` set, replacing any existing header of that name.
    #[must_use]
    pub fn with_header(&self, name: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        next.headers.push((Arc::from(name), value.into()));
        next
    }

    #[must_use]
    pub fn with_cookie(&self, cookie: SetCookie) -> Self {
        let mut next = self.clone();
        next.cookies.retain(|c| c.name != cookie.name);
        next.cookies.push(cookie);
        next
    }

    pub fn with_status(&self, status: u16) -> Result<Self, ResponseError> {
        let mut next = self.clone();
        next.status = check_status(status)?;
        Ok(next)
    }

    #[must_use]
    pub fn with_body(&self, body: impl Into<BoundaryValue>) -> Self {
        let mut next = self.clone();
        next.body = body.into();
        next
    }

    /// Serialize the body for the wire.
    ///
    /// `Null` renders as zero bytes and bytes go out as-is. Strings are raw UTF-8 unless the
    /// content type is JSON, in which case they are JSON string literals. Anything else is JSON.
    pub fn body_bytes(&self) -> Result<Bytes, ProjectionError> {
        render_body(&self.body, self.content_type().is_some_and(is_json_media_type))
    }
}

/// `application/json` or any `+json` suffix type, ignoring parameters and case.
#[must_use]
pub fn is_json_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == CONTENT_TYPE_JSON || essence.ends_with("+json")
}

fn render_body(body: &BoundaryValue, json: bool) -> Result<Bytes, ProjectionError> {
    Ok(match body {
        BoundaryValue::Null => Bytes::new(),
        BoundaryValue::Str(s) if !json => Bytes::copy_from_slice(s.as_bytes()),
        BoundaryValue::Bytes(b) => b.clone(),
        other => {
            let json = other.to_json()?;
            let raw = serde_json::to_vec(&json).map_err(|e| ProjectionError::Serde {
                message: e.to_string(),
            })?;
            Bytes::from(raw)
        }
    })
}

/// What a handler hands back before conversion.
pub enum HandlerReturn {
    Response(Response),
    Value(BoundaryValue),
    Stream(StreamingResponse),
}

impl fmt::Debug for HandlerReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerReturn::Response(r) => f.debug_tuple("Response").field(r).finish(),
            HandlerReturn::Value(v) => f.debug_tuple("Value").field(v).finish(),
            HandlerReturn::Stream(s) => f.debug_tuple("Stream").field(&s.status()).finish(),
        }
    }
}

impl From<Response> for HandlerReturn {
    fn from(r: Response) -> Self {
        HandlerReturn::Response(r)
    }
}

impl From<BoundaryValue> for HandlerReturn {
    fn from(v: BoundaryValue) -> Self {
        HandlerReturn::Value(v)
    }
}

impl From<StreamingResponse> for HandlerReturn {
    fn from(s: StreamingResponse) -> Self {
        HandlerReturn::Stream(s)
    }
}

/// Final reply: a fully materialized response or a stream to be pulled by the transport.
pub enum Reply {
    Full(Response),
    Stream(StreamingResponse),
}

impl Reply {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Reply::Full(r) => r.status(),
            Reply::Stream(s) => s.status(),
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        match self {
            Reply::Full(r) => r.header(name),
            Reply::Stream(s) => s.header(name),
        }
    }

    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        match self {
            Reply::Full(r) => Some(r),
            Reply::Stream(_) => None,
        }
    }

    #[must_use]
    pub fn into_stream(self) -> Option<StreamingResponse> {
        match self {
            Reply::Full(_) => None,
            Reply::Stream(s) => Some(s),
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Full(r) => f.debug_tuple("Full").field(r).finish(),
            Reply::Stream(s) => f.debug_tuple("Stream").field(&s.status()).finish(),
        }
    }
}

/// Normalize any handler return into a [`Reply`].
#[must_use]
pub fn convert(ret: HandlerReturn) -> Reply {
    match ret {
        HandlerReturn::Response(r) => Reply::Full(r),
        HandlerReturn::Value(v) => Reply::Full(convert_value(v)),
        HandlerReturn::Stream(s) => Reply::Stream(s),
    }
}

/// Apply the conversion table to a bare value.
#[must_use]
pub fn convert_value(value: BoundaryValue) -> Response {
    match value {
        BoundaryValue::Null => Response::no_content(),
        BoundaryValue::Str(s) => Response::text(s),
        v @ (BoundaryValue::Map(_) | BoundaryValue::List(_)) => Response::json(v),
        v @ (BoundaryValue::Int(_) | BoundaryValue::Float(_) | BoundaryValue::Bool(_)) => {
            let mut wrapped = BoundaryMap::with_capacity(1);
            wrapped.insert("result", v);
            Response::json(wrapped)
        }
        BoundaryValue::Bytes(b) => Response::ok_with(BoundaryValue::Bytes(b), CONTENT_TYPE_OCTET),
    }
}
