//! Credentials turned into request headers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use noderpc_core::transport::Headers;

/// Credentials attached to every call and to the stream handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Auth {
    /// HTTP basic authentication.
    Basic { username: String, password: String },
    /// A bearer token.
    Bearer { secret: String },
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(secret: impl Into<String>) -> Self {
        Self::Bearer {
            secret: secret.into(),
        }
    }

    /// Value of the `Authorization` header.
    pub fn header_value(&self) -> String {
        match self {
            Self::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
            Self::Bearer { secret } => format!("Bearer {secret}"),
        }
    }

    /// Add the `Authorization` header to `headers`.
    pub fn apply(&self, headers: &mut Headers) {
        headers.insert("Authorization".to_string(), self.header_value());
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}
