//! # Server-Sent Events
//!
//! Frame formatting and a coroutine-friendly channel that feeds the event-stream profile of
//! the [streaming pipeline](crate::streaming).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use brrtdispatch::sse::{self, SseEvent};
//!
//! let (sender, receiver) = sse::channel();
//! may::go!(move || {
//!     for i in 0..3 {
//!         sender.send_event(SseEvent::data(i.to_string()).event("tick"));
//!     }
//! });
//! let reply = receiver.into_response([("Cache-Control", "no-store")]);
//! ```
//!
//! ## Frame format
//!
//! ```text
//! event: tick
//! id: 7
//! data: first line
//! data: second line
//!
//! ```

use crate::streaming::StreamingResponse;
use may::sync::mpsc;

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
    pub data: String,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.event = Some(name.into());
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }

    /// Render as a `text/event-stream` frame. Multi-line data becomes one `data:` line each.
    #[must_use]
    pub fn to_frame(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 16);
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(retry) = self.retry {
            out.push_str("retry: ");
            out.push_str(&retry.to_string());
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Sender side of an SSE channel.
///
/// Clone this to send events from multiple coroutines.
#[derive(Clone)]
pub struct SseSender {
    tx: mpsc::Sender<String>,
}

impl SseSender {
    /// Queue a data-only event. Returns `false` once the receiver is gone.
    pub fn send(&self, data: impl Into<String>) -> bool {
        self.send_event(SseEvent::data(data))
    }

    pub fn send_event(&self, event: SseEvent) -> bool {
        self.tx.send(event.to_frame()).is_ok()
    }
}

/// Receiver side; iterates formatted frames until every sender is dropped.
pub struct SseReceiver {
    rx: mpsc::Receiver<String>,
}

impl Iterator for SseReceiver {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.rx.recv().ok()
    }
}

impl SseReceiver {
    /// Drain every queued frame into one string.
    pub fn collect_frames(self) -> String {
        self.collect()
    }

    /// Wrap as an event-stream reply; `headers` override the defaults.
    pub fn into_response<H, K, V>(self, headers: H) -> StreamingResponse
    where
        H: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        StreamingResponse::event_stream(self, headers)
    }
}

/// Create a new SSE channel returning the sender and receiver halves.
pub fn channel() -> (SseSender, SseReceiver) {
    let (tx, rx) = mpsc::channel();
    (SseSender { tx }, SseReceiver { rx })
}
