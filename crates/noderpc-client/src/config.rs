//! Client configuration.
//!
//! A [`ClientConfig`] can be built in code or loaded from a JSON file:
//!
//! ```json
//! {
//!   "url": "https://node.example:8648",
//!   "auth": { "type": "basic", "username": "rpc", "password": "secret" },
//!   "timeout_ms": 5000
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use noderpc_core::result::CallOptions;
use noderpc_core::transport::Headers;

use crate::auth::Auth;
use crate::error::ClientError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Node URL for request/response calls (`http` or `https`).
    pub url: String,
    /// Streaming URL. Derived from `url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    /// Default per-call timeout in milliseconds. `0` disables it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How long to wait for a connection to be established.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Ask for chain-state metadata on every call.
    #[serde(default)]
    pub with_metadata: bool,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ws_url: None,
            auth: None,
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
            with_metadata: false,
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_metadata(mut self, with_metadata: bool) -> Self {
        self.with_metadata = with_metadata;
        self
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The call URL, checked to be `http` or `https`.
    pub fn http_url(&self) -> Result<String, ClientError> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "http" | "https" => Ok(self.url.clone()),
            other => Err(ClientError::UnsupportedScheme(other.to_string())),
        }
    }

    /// The streaming URL: `ws_url` if set, otherwise `url` with `http`
    /// mapped to `ws`, `https` to `wss` and the path set to `/ws`.
    pub fn stream_url(&self) -> Result<String, ClientError> {
        if let Some(ws_url) = &self.ws_url {
            let parsed = Url::parse(ws_url)?;
            return match parsed.scheme() {
                "ws" | "wss" => Ok(ws_url.clone()),
                other => Err(ClientError::UnsupportedScheme(other.to_string())),
            };
        }

        let mut url = Url::parse(&self.url)?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ClientError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| ClientError::UnsupportedScheme(url.scheme().to_string()))?;
        url.set_path("/ws");
        Ok(url.to_string())
    }

    /// Headers sent with every call and with the stream handshake.
    pub fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        if let Some(auth) = &self.auth {
            auth.apply(&mut headers);
        }
        headers
    }

    /// Default options for calls made through the facade.
    pub fn call_options(&self) -> CallOptions {
        match self.timeout_ms {
            0 => CallOptions::no_timeout(),
            ms => CallOptions::with_timeout(Duration::from_millis(ms)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
