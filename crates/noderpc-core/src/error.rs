//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Numeric codes carried by synthesized failure results.
///
/// Server errors keep the node's own code; these are only used when the
/// client produces the failure itself.
pub mod codes {
    /// Response body could not be parsed or decoded.
    pub const PARSE_ERROR: i64 = -32700;
    /// Request was rejected before it reached the wire.
    pub const INVALID_REQUEST: i64 = -32600;
    /// No response within the configured timeout.
    pub const TIMEOUT: i64 = -32001;
    /// Network failure or non-success HTTP status.
    pub const TRANSPORT: i64 = -32002;
    /// The streaming connection closed or errored.
    pub const CONNECTION_CLOSED: i64 = -32003;
    /// A write was attempted before the stream signalled readiness.
    pub const NOT_READY: i64 = -32004;
}

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The stream has not signalled readiness yet.
    #[error("Stream is not ready for writing")]
    NotReady,

    /// The streaming connection went away.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The request was malformed before sending.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// The code reported in a failure result for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::Rpc(err) => err.code,
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::NotReady => codes::NOT_READY,
            Self::ConnectionClosed(_) => codes::CONNECTION_CLOSED,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::Deserialization(_) => codes::PARSE_ERROR,
            Self::Http(_) | Self::WebSocket(_) | Self::Other(_) => codes::TRANSPORT,
        }
    }

    /// The message reported in a failure result for this error.
    ///
    /// Node errors are passed through verbatim.
    pub fn message(&self) -> String {
        match self {
            Self::Rpc(err) => err.message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns `true` if this error is transient and the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::WebSocket(_)
                | Self::Timeout { .. }
                | Self::ConnectionClosed(_)
                | Self::NotReady
        )
    }

    /// Returns `true` if this is a node-side error (not retryable).
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}
