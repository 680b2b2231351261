//! Errors raised while building a [`NodeClient`](crate::NodeClient).
//!
//! Per-call failures never use this type; they come back inside
//! [`CallResult`](noderpc_core::CallResult).

use thiserror::Error;

use noderpc_core::error::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The node URL could not be parsed.
    #[error("invalid node URL: {0}")]
    Url(#[from] url::ParseError),

    /// The node URL uses a scheme the client cannot talk to.
    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for [`ClientConfig`](crate::ClientConfig).
    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    /// The underlying transport could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
