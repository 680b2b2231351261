//! JSON-RPC 2.0 wire types.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request ID — string, number, or null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    #[default]
    Null,
}

impl RpcId {
    pub fn number(n: u64) -> Self {
        Self::Number(n)
    }

    /// The numeric id, if this is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Monotonic request id allocator owned by one channel instance.
///
/// Ids start at 1 and are never handed out twice by the same counter.
#[derive(Debug)]
pub struct RequestIdCounter {
    next: AtomicU64,
}

impl RequestIdCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A single JSON-RPC parameter value.
pub type RpcParam = Value;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<RpcParam>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<RpcParam>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Returns `true` if this is a successful response (has result, no error).
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    /// Unwrap the result value or return an error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// Server-assigned identifier of an open subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionId {
    Number(u64),
    String(String),
}

impl SubscriptionId {
    /// Extract the subscription id from a subscribe acknowledgement.
    ///
    /// Nodes answer with the bare id, `{"subscriptionId": id}` or the
    /// `{"data": id}` result wrapper.
    pub fn from_ack(result: &Value) -> Option<Self> {
        let raw = match result {
            Value::Object(map) => map.get("subscriptionId").or_else(|| map.get("data"))?,
            other => other,
        };
        serde_json::from_value(raw.clone()).ok()
    }
}

impl From<u64> for SubscriptionId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// The `params` object of a server push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushParams {
    pub subscription: SubscriptionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A server-initiated push for an open subscription. Carries no `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    pub params: PushParams,
}

/// A classified inbound message on a streaming connection.
#[derive(Debug)]
pub enum Inbound {
    /// A response correlated to one of our requests by `id`.
    Response(JsonRpcResponse),
    /// A push for a subscription.
    Push(JsonRpcNotification),
    /// Carries a usable `id` but does not decode as a response.
    Malformed {
        id: RpcId,
        error: serde_json::Error,
    },
    /// Valid JSON that is neither.
    Other(Value),
}

impl Inbound {
    /// Parse and classify a text frame.
    ///
    /// Only text that is not JSON at all is an `Err`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let val: Value = serde_json::from_str(text)?;

        let has_id = val.get("id").is_some_and(|id| !id.is_null());
        let is_push = !has_id
            && val.get("method").is_some()
            && val.pointer("/params/subscription").is_some();

        if is_push {
            return Ok(match serde_json::from_value(val.clone()) {
                Ok(push) => Self::Push(push),
                Err(_) => Self::Other(val),
            });
        }
        if has_id && (val.get("result").is_some() || val.get("error").is_some()) {
            let id = val
                .get("id")
                .and_then(|id| serde_json::from_value::<RpcId>(id.clone()).ok())
                .unwrap_or_default();
            return Ok(match serde_json::from_value(val) {
                Ok(resp) => Self::Response(resp),
                Err(error) => Self::Malformed { id, error },
            });
        }
        Ok(Self::Other(val))
    }
}
