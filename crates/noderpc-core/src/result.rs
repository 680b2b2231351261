//! The uniform result envelope returned by every call and push delivery.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{codes, TransportError};
use crate::request::JsonRpcResponse;
use crate::transport::Headers;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Audit record of the request that produced a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Headers sent with the request.
    pub headers: Headers,
    /// Serialized request body.
    pub body: String,
    /// When the request was built.
    pub timestamp: DateTime<Utc>,
    /// Target URL.
    pub url: String,
}

impl TraceContext {
    pub fn new(url: impl Into<String>, headers: Headers, body: impl Into<String>) -> Self {
        Self {
            headers,
            body: body.into(),
            timestamp: Utc::now(),
            url: url.into(),
        }
    }
}

/// Per-call tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// `None` disables the timeout.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    pub fn no_timeout() -> Self {
        Self { timeout: None }
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }
}

/// Successful call payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSuccess<T> {
    pub data: T,
    pub metadata: Option<Value>,
    pub context: TraceContext,
}

impl<T> CallSuccess<T> {
    /// Decode the metadata into a typed shape, if present and well-formed.
    pub fn metadata_as<M: DeserializeOwned>(&self) -> Option<M> {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_value(m.clone()).ok())
    }
}

/// Failed call payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFailure {
    pub code: i64,
    pub message: String,
    pub context: TraceContext,
}

impl CallFailure {
    pub fn from_error(err: &TransportError, context: TraceContext) -> Self {
        Self {
            code: err.code(),
            message: err.message(),
            context,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.code == codes::TIMEOUT
    }
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call to {} failed ({}): {}", self.context.url, self.code, self.message)
    }
}

impl std::error::Error for CallFailure {}

/// Outcome of a call or push: exactly one of success or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult<T> {
    Success(CallSuccess<T>),
    Failure(CallFailure),
}

impl<T> CallResult<T> {
    pub fn success(data: T, metadata: Option<Value>, context: TraceContext) -> Self {
        Self::Success(CallSuccess {
            data,
            metadata,
            context,
        })
    }

    pub fn failure(code: i64, message: impl Into<String>, context: TraceContext) -> Self {
        Self::Failure(CallFailure {
            code,
            message: message.into(),
            context,
        })
    }

    pub fn from_error(err: &TransportError, context: TraceContext) -> Self {
        Self::Failure(CallFailure::from_error(err, context))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success(s) => Some(&s.data),
            Self::Failure(_) => None,
        }
    }

    pub fn metadata(&self) -> Option<&Value> {
        match self {
            Self::Success(s) => s.metadata.as_ref(),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CallFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(f),
        }
    }

    pub fn context(&self) -> &TraceContext {
        match self {
            Self::Success(s) => &s.context,
            Self::Failure(f) => &f.context,
        }
    }

    pub fn into_result(self) -> Result<CallSuccess<T>, CallFailure> {
        match self {
            Self::Success(s) => Ok(s),
            Self::Failure(f) => Err(f),
        }
    }

    /// Convenience: the bare data or the failure.
    pub fn into_data(self) -> Result<T, CallFailure> {
        self.into_result().map(|s| s.data)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallResult<U> {
        match self {
            Self::Success(s) => CallResult::Success(CallSuccess {
                data: f(s.data),
                metadata: s.metadata,
                context: s.context,
            }),
            Self::Failure(e) => CallResult::Failure(e),
        }
    }
}

impl<T: DeserializeOwned> CallResult<T> {
    /// Normalize a correlated response.
    ///
    /// Node errors are kept verbatim; metadata is dropped unless requested.
    pub fn from_response(
        resp: JsonRpcResponse,
        with_metadata: bool,
        context: TraceContext,
    ) -> Self {
        match resp.into_result() {
            Err(err) => Self::failure(err.code, err.message, context),
            Ok(result) => {
                let (data, metadata) = split_result(result);
                let metadata = if with_metadata { metadata } else { None };
                match serde_json::from_value::<T>(data) {
                    Ok(data) => Self::success(data, metadata, context),
                    Err(e) => Self::from_error(&TransportError::Deserialization(e), context),
                }
            }
        }
    }
}

impl CallResult<Value> {
    /// Deserialize the data into `U`; a shape mismatch becomes a parse failure.
    pub fn decode<U: DeserializeOwned>(self) -> CallResult<U> {
        match self {
            Self::Success(s) => match serde_json::from_value::<U>(s.data) {
                Ok(data) => CallResult::Success(CallSuccess {
                    data,
                    metadata: s.metadata,
                    context: s.context,
                }),
                Err(e) => CallResult::failure(codes::PARSE_ERROR, e.to_string(), s.context),
            },
            Self::Failure(e) => CallResult::Failure(e),
        }
    }
}

/// Split a node `result` into `(data, metadata)`.
///
/// Results shaped `{"data": .., "metadata": ..}` are unwrapped; anything else
/// is taken as bare data.
pub fn split_result(result: Value) -> (Value, Option<Value>) {
    match result {
        Value::Object(mut map) if map.contains_key("data") => {
            let data = map.remove("data").unwrap_or(Value::Null);
            let metadata = map.remove("metadata").filter(|m| !m.is_null());
            (data, metadata)
        }
        other => (other, None),
    }
}
