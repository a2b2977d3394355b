//! Adapting an execution engine that speaks encoded frames into a [`Handler`].
//!
//! The engine receives one frame holding `{"request": <request map>, "args": <argument map>}`
//! and answers with one frame. The reply is either a bare value, converted like any other
//! handler return, or a structured response map carrying exactly `status_code`, `content` and
//! `headers`.

use crate::codec;
use crate::handler::{Handler, HandlerContext};
use crate::params::ParameterDescriptor;
use crate::request::Request;
use crate::response::{convert_value, HandlerReturn};
use crate::value::{BoundaryMap, BoundaryValue};
use anyhow::Context;
use bytes::Bytes;
use std::fmt;
use tracing::debug;

/// Engine entry point: request frame in, reply frame out.
pub type EngineFn = dyn Fn(Bytes) -> anyhow::Result<Bytes> + Send + Sync;

/// A handler whose body runs on the other side of the boundary.
pub struct ForeignHandler {
    name: String,
    params: Vec<ParameterDescriptor>,
    engine: Box<EngineFn>,
}

impl fmt::Debug for ForeignHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignHandler")
            .field("name", &self.name)
            .field("params", &self.params.len())
            .finish_non_exhaustive()
    }
}

impl ForeignHandler {
    pub fn new<F>(name: impl Into<String>, engine: F) -> Self
    where
        F: Fn(Bytes) -> anyhow::Result<Bytes> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            engine: Box::new(engine),
        }
    }

    #[must_use]
    pub fn param(mut self, descriptor: ParameterDescriptor) -> Self {
        self.params.push(descriptor);
        self
    }
}

/// The frame the engine receives.
pub fn encode_call(request: &Request, args: &BoundaryMap) -> Result<Bytes, codec::CodecError> {
    let mut envelope = BoundaryMap::with_capacity(2);
    envelope.insert("request", request.to_boundary());
    envelope.insert("args", args.clone());
    codec::encode(&BoundaryValue::Map(envelope))
}

/// Interpret a decoded reply.
pub fn reply_to_return(reply: BoundaryValue) -> anyhow::Result<HandlerReturn> {
    let structured = match &reply {
        BoundaryValue::Map(m)
            if m.len() == 3
                && m.contains_key("status_code")
                && m.contains_key("content")
                && m.contains_key("headers") =>
        {
            Some(m)
        }
        _ => None,
    };
    let Some(map) = structured else {
        return Ok(HandlerReturn::Value(reply));
    };

    let status = map
        .get("status_code")
        .and_then(BoundaryValue::as_int)
        .and_then(|s| u16::try_from(s).ok())
        .context("structured reply has a non-integer status_code")?;
    let content = map.get("content").cloned().unwrap_or_default();
    let mut response = convert_value(content).with_status(status)?;
    if let Some(headers) = map.get("headers").and_then(BoundaryValue::as_map) {
        for (name, value) in headers.iter() {
            let value = value
                .as_str()
                .with_context(|| format!("header '{name}' is not a string"))?;
            response = response.with_header(name, value);
        }
    }
    Ok(HandlerReturn::Response(response))
}

impl Handler for ForeignHandler {
    fn call(&self, ctx: HandlerContext) -> anyhow::Result<HandlerReturn> {
        let frame = encode_call(&ctx.request, &ctx.args.to_map())?;
        let sent = frame.len();
        let reply = (self.engine)(frame)
            .with_context(|| format!("engine call for handler '{}' failed", self.name))?;
        debug!(
            handler = %self.name,
            request_bytes = sent,
            reply_bytes = reply.len(),
            "Boundary round trip"
        );
        let value = codec::decode(reply)
            .with_context(|| format!("malformed reply frame from handler '{}'", self.name))?;
        reply_to_return(value)
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
    use crate::background::BackgroundTasks;
    use crate::params::Arguments;

    fn ctx(request: Request) -> HandlerContext {
        HandlerContext {
            request,
            args: Arguments::default(),
            background: BackgroundTasks::new(),
            request_id: None,
        }
    }

    #[test]
    fn engine_sees_request_and_value_reply_is_converted() {
        let h = ForeignHandler::new("echo_path", |frame| {
            let call = codec::decode(frame)?;
            let path = call
                .get("request")
                .and_then(|r| r.get("path"))
                .cloned()
                .unwrap_or_default();
            Ok(codec::encode(&path)?)
        });
        let out = h.call(ctx(Request::builder("GET", "/hello").build())).unwrap();
        assert!(matches!(out, HandlerReturn::Value(BoundaryValue::Str(ref s)) if s == "/hello"));
    }

    #[test]
    fn structured_reply_sets_status_and_headers() {
        let reply: BoundaryValue = BoundaryMap::from_iter([
            ("status_code", BoundaryValue::Int(201)),
            (
                "content",
                BoundaryValue::Map(BoundaryMap::from_iter([("id", 1)])),
            ),
            (
                "headers",
                BoundaryValue::Map(BoundaryMap::from_iter([("Location", "/pets/1")])),
            ),
        ])
        .into();
        let HandlerReturn::Response(r) = reply_to_return(reply).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(r.status(), 201);
        assert_eq!(r.header("location"), Some("/pets/1"));
        assert_eq!(r.content_type(), Some("application/json"));
    }

    #[test]
    fn structured_string_content_under_json_renders_as_json() {
        let reply: BoundaryValue = BoundaryMap::from_iter([
            ("status_code", BoundaryValue::Int(200)),
            ("content", BoundaryValue::from("hello")),
            (
                "headers",
                BoundaryValue::Map(BoundaryMap::from_iter([(
                    "content-type",
                    "application/json",
                )])),
            ),
        ])
        .into();
        let HandlerReturn::Response(r) = reply_to_return(reply).unwrap() else {
            panic!("expected a response");
        };
        let body: serde_json::Value = serde_json::from_slice(&r.body_bytes().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!("hello"));
    }

    #[test]
    fn map_with_extra_keys_is_a_plain_value() {
        let reply: BoundaryValue = BoundaryMap::from_iter([
            ("status_code", BoundaryValue::Int(201)),
            ("content", BoundaryValue::Null),
            ("headers", BoundaryValue::Null),
            ("other", BoundaryValue::Null),
        ])
        .into();
        assert!(matches!(reply_to_return(reply).unwrap(), HandlerReturn::Value(_)));
    }

    #[test]
    fn engine_failure_is_an_error() {
        let h = ForeignHandler::new("broken", |_| anyhow::bail!("engine down"));
        let err = h.call(ctx(Request::builder("GET", "/").build())).unwrap_err();
        assert!(format!("{err:#}").contains("engine down"));
    }

    #[test]
    fn garbage_reply_is_an_error() {
        let h = ForeignHandler::new("garbage", |_| Ok(Bytes::from_static(&[9, 9])));
        assert!(h.call(ctx(Request::builder("GET", "/").build())).is_err());
    }
}
