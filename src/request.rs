//! Immutable request representation.
//!
//! A [`Request`] is built once, either programmatically through [`RequestBuilder`] or from raw
//! transport parts through [`Request::parse`], and is never mutated afterwards. Deriving a
//! request with router-captured path parameters ([`Request::with_path_params`]) produces a new
//! value and leaves the original intact.
//!
//! Header names are stored lower-cased and looked up case-insensitively. Query parameters keep
//! every occurrence of a repeated key in arrival order.

use crate::response::CONTENT_TYPE_OCTET;
use crate::value::{BoundaryMap, BoundaryValue, ProjectionError};
use bytes::Bytes;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Maximum number of headers stored inline before spilling to the heap.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Maximum number of path parameters stored inline.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Ordered header list, lower-cased names.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Ordered path parameter list.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// An uploaded file attached to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRef {
    pub filename: String,
    pub content_type: String,
    pub content: Bytes,
}

impl FileRef {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Map projection: `{filename, content_type, size, content}`.
    #[must_use]
    pub fn to_boundary(&self) -> BoundaryValue {
        let mut map = BoundaryMap::with_capacity(4);
        map.insert("filename", self.filename.as_str());
        map.insert("content_type", self.content_type.as_str());
        map.insert(
            "size",
            BoundaryValue::try_from(self.size()).unwrap_or(BoundaryValue::Int(i64::MAX)),
        );
        map.insert("content", self.content.clone());
        BoundaryValue::Map(map)
    }
}

/// An incoming request, immutable after construction.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    path: String,
    body: Option<BoundaryValue>,
    headers: HeaderVec,
    cookies: HashMap<String, String>,
    query_params: HashMap<String, Vec<String>>,
    path_params: ParamVec,
    files: HashMap<String, FileRef>,
    dependencies: Option<Arc<BoundaryMap>>,
}

impl Request {
    /// Start building a request for `method` and `target` (`/path?query`).
    pub fn builder(method: &str, target: &str) -> RequestBuilder {
        RequestBuilder::new(method, target)
    }

    /// Upper-cased request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path with any query string removed.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `None` when the request carried no body. `Some(Null)` is an explicit JSON `null`.
    #[must_use]
    pub fn body(&self) -> Option<&BoundaryValue> {
        self.body.as_ref()
    }

    /// First header with the given name, case-insensitive.
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
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Last occurrence of a query parameter.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params
            .get(name)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    /// Every occurrence of a query parameter, in arrival order.
    #[must_use]
    pub fn query_all(&self, name: &str) -> &[String] {
        self.query_params.get(name).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn query_params(&self) -> &HashMap<String, Vec<String>> {
        &self.query_params
    }

    /// Path parameter by name; the last capture wins on duplicates.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn path_params(&self) -> &[(Arc<str>, String)] {
        &self.path_params
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&FileRef> {
        self.files.get(name)
    }

    #[must_use]
    pub fn files(&self) -> &HashMap<String, FileRef> {
        &self.files
    }

    /// Named value from the dependency context bag.
    #[must_use]
    pub fn dependency(&self, name: &str) -> Option<&BoundaryValue> {
        self.dependencies.as_ref().and_then(|d| d.get(name))
    }

    #[must_use]
    pub fn has_dependencies(&self) -> bool {
        self.dependencies.is_some()
    }

    /// A copy of this request carrying additional path parameters.
    ///
    /// Captured values are appended, so they take precedence over earlier entries
    /// with the same name.
    #[must_use]
    pub fn with_path_params(&self, captured: &[(Arc<str>, String)]) -> Request {
        let mut next = self.clone();
        next.path_params.extend(captured.iter().cloned());
        next
    }

    /// A copy with `name` set in the dependency bag. Lifecycle hooks use this to inject
    /// values for implicit parameters.
    #[must_use]
    pub fn with_dependency(&self, name: &str, value: impl Into<BoundaryValue>) -> Request {
        let mut deps = self
            .dependencies
            .as_deref()
            .cloned()
            .unwrap_or_default();
        deps.insert(name, value);
        let mut next = self.clone();
        next.dependencies = Some(Arc::new(deps));
        next
    }

    /// A copy with `name` replaced by a single header. A new `Cookie` header does not
    /// re-parse cookies.
    #[must_use]
    pub fn with_header(&self, name: &str, value: impl Into<String>) -> Request {
        let mut next = self.clone();
        next.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        next.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
        next
    }

    /// Map projection used when the request crosses the runtime boundary.
    ///
    /// The `body` key is omitted entirely when the request had no body, so an absent body
    /// stays distinguishable from an explicit `null`.
    #[must_use]
    pub fn to_boundary(&self) -> BoundaryValue {
        let mut map = BoundaryMap::with_capacity(9);
        map.insert("method", self.method.as_str());
        map.insert("path", self.path.as_str());
        map.insert(
            "headers",
            BoundaryValue::List(
                self.headers
                    .iter()
                    .map(|(k, v)| {
                        BoundaryValue::List(vec![BoundaryValue::from(&**k), v.as_str().into()])
                    })
                    .collect(),
            ),
        );
        map.insert(
            "cookies",
            self.cookies
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str()))
                .collect::<BoundaryMap>(),
        );
        map.insert(
            "query_params",
            self.query_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BoundaryMap>(),
        );
        map.insert(
            "path_params",
            self.path_params
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_str()))
                .collect::<BoundaryMap>(),
        );
        map.insert(
            "files",
            self.files
                .iter()
                .map(|(k, f)| (k.clone(), f.to_boundary()))
                .collect::<BoundaryMap>(),
        );
        if let Some(body) = &self.body {
            map.insert("body", body.clone());
        }
        if let Some(deps) = &self.dependencies {
            map.insert("dependencies", BoundaryValue::Map(deps.as_ref().clone()));
        }
        BoundaryValue::Map(map)
    }

    /// Build a request from raw transport parts.
    ///
    /// The body is decoded by content type: JSON (or no content type) into a structured value,
    /// `application/x-www-form-urlencoded` into a map of strings, `text/*` into a string, and
    /// anything else into bytes. `multipart/form-data` parts with a filename land in the file
    /// map; the remaining fields form a map body. An empty body is absent.
    pub fn parse(
        raw: RawRequest,
        max_body_size: Option<u64>,
    ) -> Result<Request, RequestParseError> {
        if http::Method::from_bytes(raw.method.as_bytes()).is_err() {
            return Err(RequestParseError::InvalidMethod(raw.method));
        }
        if !raw.target.starts_with('/') {
            return Err(RequestParseError::InvalidTarget(raw.target));
        }
        if let Some(limit) = max_body_size {
            let actual = raw.body.len() as u64;
            if actual > limit {
                return Err(RequestParseError::BodyTooLarge { limit, actual });
            }
        }

        let mut builder = RequestBuilder::new(&raw.method, &raw.target);
        let mut content_type = String::new();
        for (name, value) in &raw.headers {
            if name.eq_ignore_ascii_case("content-type") {
                content_type.clone_from(value);
            }
            builder = builder.header(name, value.as_str());
        }

        if !raw.body.is_empty() {
            if media_type(&content_type) == "multipart/form-data" {
                let (fields, files) = parse_multipart(&content_type, &raw.body)?;
                for (field, file) in files {
                    builder = builder.file(field, file);
                }
                builder = builder.body(BoundaryValue::Map(fields));
            } else {
                builder = builder.body(decode_body(&content_type, &raw.body)?);
            }
        }

        let request = builder.build();
        debug!(
            method = %request.method(),
            path = %request.path(),
            headers_count = request.headers().len(),
            body_present = request.body().is_some(),
            "Request parsed"
        );
        Ok(request)
    }
}

/// Lower-cased media type without parameters.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn decode_body(content_type: &str, body: &Bytes) -> Result<BoundaryValue, RequestParseError> {
    let mime = media_type(content_type);
    let mime = mime.as_str();
    if mime.is_empty() || mime == "application/json" || mime.ends_with("+json") {
        let json: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| RequestParseError::MalformedJson(e.to_string()))?;
        return BoundaryValue::from_json(json).map_err(RequestParseError::Projection);
    }
    if mime == "application/x-www-form-urlencoded" {
        let map: BoundaryMap = url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        return Ok(BoundaryValue::Map(map));
    }
    if mime.starts_with("text/") {
        return std::str::from_utf8(body)
            .map(|s| BoundaryValue::Str(s.to_owned()))
            .map_err(|_| RequestParseError::InvalidUtf8);
    }
    Ok(BoundaryValue::Bytes(body.clone()))
}

/// Longest boundary RFC 2046 allows.
const MAX_BOUNDARY_LEN: usize = 70;

fn multipart_boundary(content_type: &str) -> Result<&str, RequestParseError> {
    let boundary = content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .ok_or(RequestParseError::MissingBoundary)?;
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(RequestParseError::MalformedMultipart(format!(
            "invalid boundary '{boundary}'"
        )));
    }
    Ok(boundary)
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// `name="value"` from a header parameter list.
fn header_param<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim().trim_matches('"'))
}

/// Split a `multipart/form-data` body into text fields and files.
///
/// File contents are zero-copy slices of `body`. A repeated text field keeps its last value.
fn parse_multipart(
    content_type: &str,
    body: &Bytes,
) -> Result<(BoundaryMap, Vec<(String, FileRef)>), RequestParseError> {
    let malformed = |why: &str| RequestParseError::MalformedMultipart(why.to_string());
    let delimiter = format!("--{}", multipart_boundary(content_type)?);
    let delimiter = delimiter.as_bytes();

    let mut fields = BoundaryMap::new();
    let mut files = Vec::new();
    let opening =
        find_from(body, delimiter, 0).ok_or_else(|| malformed("no opening boundary"))?;
    let mut cursor = opening + delimiter.len();
    loop {
        match body.get(cursor..cursor + 2) {
            Some(b"--") => break,
            Some(b"\r\n") => cursor += 2,
            _ => return Err(malformed("boundary not followed by CRLF")),
        }
        let headers_end = find_from(body, b"\r\n\r\n", cursor)
            .ok_or_else(|| malformed("part without headers"))?;
        let content_start = headers_end + 4;
        let mut next = b"\r\n".to_vec();
        next.extend_from_slice(delimiter);
        let content_end = find_from(body, &next, content_start)
            .ok_or_else(|| malformed("missing closing boundary"))?;

        let headers = std::str::from_utf8(&body[cursor..headers_end])
            .map_err(|_| RequestParseError::InvalidUtf8)?;
        let mut disposition = None;
        let mut part_type = None;
        for line in headers.split("\r\n") {
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-disposition") {
                    disposition = Some(value.trim());
                } else if name.trim().eq_ignore_ascii_case("content-type") {
                    part_type = Some(value.trim());
                }
            }
        }
        let disposition =
            disposition.ok_or_else(|| malformed("part without Content-Disposition"))?;
        let field = header_param(disposition, "name")
            .ok_or_else(|| malformed("part without a field name"))?
            .to_string();
        let content = body.slice(content_start..content_end);

        match header_param(disposition, "filename") {
            Some(filename) => files.push((
                field,
                FileRef::new(
                    filename,
                    part_type.unwrap_or(CONTENT_TYPE_OCTET),
                    content,
                ),
            )),
            None => {
                let text = std::str::from_utf8(&content)
                    .map_err(|_| RequestParseError::InvalidUtf8)?;
                fields.insert(field, text);
            }
        }
        cursor = content_end + next.len();
    }

    debug!(fields = fields.len(), files = files.len(), "Multipart body parsed");
    Ok((fields, files))
}

/// Raw transport parts before any decoding.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: String,
    /// Path plus optional query string
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RawRequest {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Failure to turn raw transport parts into a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub enum RequestParseError {
    InvalidMethod(String),
    InvalidTarget(String),
    BodyTooLarge { limit: u64, actual: u64 },
    MalformedJson(String),
    InvalidUtf8,
    Projection(ProjectionError),
    /// `multipart/form-data` without a `boundary` parameter
    MissingBoundary,
    MalformedMultipart(String),
}

impl fmt::Display for RequestParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestParseError::InvalidMethod(m) => write!(f, "Invalid request method '{m}'"),
            RequestParseError::InvalidTarget(t) => {
                write!(f, "Invalid request target '{t}': must start with '/'")
            }
            RequestParseError::BodyTooLarge { limit, actual } => write!(
                f,
                "Request body of {actual} bytes exceeds the limit of {limit} bytes"
            ),
            RequestParseError::MalformedJson(e) => write!(f, "Malformed JSON body: {e}"),
            RequestParseError::InvalidUtf8 => write!(f, "Request body is not valid UTF-8"),
            RequestParseError::Projection(e) => write!(f, "Unsupported body value: {e}"),
            RequestParseError::MissingBoundary => {
                f.write_str("multipart/form-data requires a 'boundary' parameter")
            }
            RequestParseError::MalformedMultipart(why) => {
                write!(f, "Malformed multipart body: {why}")
            }
        }
    }
}

impl std::error::Error for RequestParseError {}

/// Accumulates request parts; [`RequestBuilder::build`] produces the immutable [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: String,
    path: String,
    body: Option<BoundaryValue>,
    headers: HeaderVec,
    cookies: HashMap<String, String>,
    query_params: HashMap<String, Vec<String>>,
    path_params: ParamVec,
    files: HashMap<String, FileRef>,
    dependencies: Option<BoundaryMap>,
}

impl RequestBuilder {
    /// `target` may carry a query string; it is split off and parsed here.
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (target, None),
        };
        let mut query_params: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(q) = query {
            for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
                query_params
                    .entry(k.into_owned())
                    .or_default()
                    .push(v.into_owned());
            }
        }
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            body: None,
            headers: HeaderVec::new(),
            cookies: HashMap::new(),
            query_params,
            path_params: ParamVec::new(),
            files: HashMap::new(),
            dependencies: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
        self
    }

    #[must_use]
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    #[must_use]
    pub fn path_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.path_params.push((Arc::from(name), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<BoundaryValue>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON convenience; fails if the document holds an integer outside `i64`.
    pub fn json(self, body: serde_json::Value) -> Result<Self, ProjectionError> {
        Ok(self.body(BoundaryValue::from_json(body)?))
    }

    #[must_use]
    pub fn file(mut self, field: impl Into<String>, file: FileRef) -> Self {
        self.files.insert(field.into(), file);
        self
    }

    #[must_use]
    pub fn dependency(mut self, name: impl Into<String>, value: impl Into<BoundaryValue>) -> Self {
        self.dependencies
            .get_or_insert_with(BoundaryMap::new)
            .insert(name, value);
        self
    }

    /// Finish the request. Cookies from a `Cookie` header are merged under any set explicitly.
    #[must_use]
    pub fn build(self) -> Request {
        let mut cookies = parse_cookies(&self.headers);
        cookies.extend(self.cookies);
        Request {
            method: self.method,
            path: self.path,
            body: self.body,
            headers: self.headers,
            cookies,
            query_params: self.query_params,
            path_params: self.path_params,
            files: self.files,
            dependencies: self.dependencies.map(Arc::new),
        }
    }
}

/// Parse every `Cookie` header into a name → value map.
pub fn parse_cookies(headers: &[(Arc<str>, String)]) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
        .flat_map(|(_, v)| v.split(';'))
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            let name = parts.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let value = parts.next().unwrap_or("").trim();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
