//! In-process client for exercising an [`App`] without a transport.
//!
//! Streaming replies are drained into the response body, so tests see exactly the bytes a
//! transport would have sent. [`TestClient::close`] may be called any number of times; every
//! request after the first close fails with [`ClientError::Closed`].

use crate::dispatcher::App;
use crate::request::{HeaderVec, RawRequest, Request};
use crate::response::Reply;
use crate::streaming::StreamError;
use crate::value::{BoundaryValue, ProjectionError};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub enum ClientError {
    /// The client was closed
    Closed,
    /// The reply body could not be rendered
    Body(ProjectionError),
    /// A streaming reply failed mid-way
    Stream(StreamError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Closed => f.write_str("client is closed"),
            ClientError::Body(e) => write!(f, "failed to render response body: {e}"),
            ClientError::Stream(e) => write!(f, "response stream failed: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Closed => None,
            ClientError::Body(e) => Some(e),
            ClientError::Stream(e) => Some(e),
        }
    }
}

/// Fully materialized reply as a transport would have written it.
#[derive(Debug, Clone)]
pub struct TestResponse {
    status: u16,
    headers: HeaderVec,
    body: Bytes,
}

impl TestResponse {
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// First header with this name, case-insensitive.
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
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }

    /// JSON body projected into a boundary value.
    pub fn boundary(&self) -> anyhow::Result<BoundaryValue> {
        Ok(BoundaryValue::from_json(self.json()?)?)
    }
}

/// Wraps an [`App`] and dispatches requests to it directly.
#[derive(Debug)]
pub struct TestClient {
    app: Arc<App>,
    closed: AtomicBool,
}

impl TestClient {
    #[must_use]
    pub fn new(app: App) -> Self {
        Self::shared(Arc::new(app))
    }

    #[must_use]
    pub fn shared(app: Arc<App>) -> Self {
        Self {
            app,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn app(&self) -> &App {
        &self.app
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Test client closed");
        }
    }

    pub fn request(&self, request: Request) -> Result<TestResponse, ClientError> {
        self.ensure_open()?;
        materialize(self.app.dispatch(request))
    }

    pub fn raw(&self, raw: RawRequest) -> Result<TestResponse, ClientError> {
        self.ensure_open()?;
        materialize(self.app.dispatch_raw(raw))
    }

    pub fn get(&self, target: &str) -> Result<TestResponse, ClientError> {
        self.request(Request::builder("GET", target).build())
    }

    pub fn delete(&self, target: &str) -> Result<TestResponse, ClientError> {
        self.request(Request::builder("DELETE", target).build())
    }

    /// POST a JSON document as raw bytes, so it goes through body decoding like a real request.
    pub fn post_json(
        &self,
        target: &str,
        body: &serde_json::Value,
    ) -> Result<TestResponse, ClientError> {
        let bytes = serde_json::to_vec(body).map_err(|e| {
            ClientError::Body(ProjectionError::Serde {
                message: e.to_string(),
            })
        })?;
        self.raw(
            RawRequest::new("POST", target)
                .with_header("Content-Type", "application/json")
                .with_body(bytes),
        )
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for TestClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn materialize(reply: Reply) -> Result<TestResponse, ClientError> {
    match reply {
        Reply::Full(response) => {
            let body = response.body_bytes().map_err(ClientError::Body)?;
            let mut headers: HeaderVec = response.headers().iter().cloned().collect();
            for cookie in response.cookies() {
                headers.push((Arc::from("Set-Cookie"), cookie.to_header_value()));
            }
            Ok(TestResponse {
                status: response.status(),
                headers,
                body,
            })
        }
        Reply::Stream(stream) => {
            let (status, headers, mut chunks) = stream.into_parts();
            let body = chunks.collect_bytes().map_err(ClientError::Stream)?;
            Ok(TestResponse {
                status,
                headers,
                body,
            })
        }
    }
}
