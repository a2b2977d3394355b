//! Tests for server-sent events
//!
//! # Test Coverage
//!
//! - Event frames follow the `text/event-stream` wire format
//! - A channel fed from a coroutine becomes an event-stream reply
//! - Event-stream defaults can be overridden by the caller
//! - SSE routes dispatch like any other GET route

mod common;

use brrtdispatch::handler::handler_fn;
use brrtdispatch::sse::{self, SseEvent};
use brrtdispatch::StreamingResponse;
use common::{apps, runtime};
use std::sync::Arc;

#[test]
fn test_event_frame_format() {
    assert_eq!(SseEvent::data("hello").to_frame(), "data: hello\n\n");
    assert_eq!(
        SseEvent::data("{\"n\":1}").event("tick").id("7").to_frame(),
        "event: tick\nid: 7\ndata: {\"n\":1}\n\n"
    );
}

#[test]
fn test_channel_from_coroutine() {
    runtime::setup_may_runtime();
    let (tx, rx) = sse::channel();
    let producer = may::go!(move || {
        for i in 0..3 {
            tx.send_event(SseEvent::data(i.to_string()).event("tick"));
        }
    });
    producer.join().unwrap();
    let frames = rx.collect_frames();
    assert_eq!(
        frames,
        "event: tick\ndata: 0\n\nevent: tick\ndata: 1\n\nevent: tick\ndata: 2\n\n"
    );
}

#[test]
fn test_send_after_receiver_dropped() {
    let (tx, rx) = sse::channel();
    assert!(tx.send("first"));
    drop(rx);
    assert!(!tx.send("second"));
}

#[test]
fn test_event_stream_headers() {
    let response = StreamingResponse::event_stream(
        vec![SseEvent::data("x").to_frame()],
        [("Cache-Control", "no-store")],
    );
    assert_eq!(response.header("content-type"), Some("text/event-stream"));
    assert_eq!(response.header("cache-control"), Some("no-store"));
    assert_eq!(response.header("x-accel-buffering"), Some("no"));
}

#[test]
fn test_sse_route_streams_events() {
    let app = apps::quiet();
    app.sse(
        "/events",
        Arc::new(handler_fn(|_| {
            let (tx, rx) = sse::channel();
            tx.send_event(SseEvent::data("ready").event("status"));
            tx.send("bye");
            drop(tx);
            Ok(rx.into_response(Vec::<(String, String)>::new()))
        })),
    )
    .unwrap();
    let res = apps::client(app).get("/events").unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.header("content-type"), Some("text/event-stream"));
    assert_eq!(
        res.text().unwrap(),
        "event: status\ndata: ready\n\ndata: bye\n\n"
    );
}
