//! Transport boundary traits consumed by the call and subscription channels.
//!
//! Both channels treat the actual I/O as an externally supplied
//! collaborator: the call channel needs a request/response sender, the
//! subscription channel a duplex text stream with lifecycle events.
//! Connection setup, TLS and credential handling live behind these traits.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Request headers, kept ordered so trace contexts are stable.
pub type Headers = BTreeMap<String, String>;

/// Status and raw body of a request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request/response transport used by the call channel.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
#[async_trait]
pub trait HttpSender: Send + Sync + 'static {
    /// POST `body` to `url` with `headers` and return the raw response.
    async fn post(
        &self,
        url: &str,
        headers: &Headers,
        body: String,
    ) -> Result<HttpResponse, TransportError>;
}

/// Lifecycle and data events from a streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The connection is ready for writes.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The connection failed. A `Close` may or may not follow.
    Error(String),
    /// The connection closed.
    Close,
}

/// Write half of a streaming connection.
pub trait StreamSender: Send + Sync + 'static {
    /// Queue a text frame for sending.
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Ask the connection to shut down.
    fn close(&self);
}

/// An opened (not necessarily ready) streaming connection.
pub struct StreamConnection {
    pub sender: Box<dyn StreamSender>,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection").finish_non_exhaustive()
    }
}

/// Factory for streaming connections used by the subscription channel.
///
/// `open` may return before the connection is usable; readiness is signalled
/// by a [`StreamEvent::Open`] on the event receiver.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    async fn open(&self, url: &str, headers: &Headers) -> Result<StreamConnection, TransportError>;
}
