//! Request/response call channel.
//!
//! Each call allocates an id from the channel's counter, POSTs the envelope
//! and expects a single response echoing that id. Transport failures,
//! timeouts and node errors all come back as the failure variant of
//! [`CallResult`]; nothing is retried here.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use noderpc_core::error::TransportError;
use noderpc_core::request::{JsonRpcRequest, JsonRpcResponse, RequestIdCounter, RpcId};
use noderpc_core::result::{CallOptions, CallResult, TraceContext};
use noderpc_core::transport::{Headers, HttpSender};

use crate::sender::ReqwestSender;

/// Configuration for [`CallChannel`].
#[derive(Debug, Clone)]
pub struct CallChannelConfig {
    /// Headers attached to every request (auth, user agent, ...).
    pub headers: Headers,
    /// Bound on establishing the underlying connection.
    pub connect_timeout: Duration,
}

impl Default for CallChannelConfig {
    fn default() -> Self {
        Self {
            headers: Headers::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// JSON-RPC call channel over a request/response transport.
///
/// Safe to share between tasks; calls are independent and correlated only by
/// their own id.
pub struct CallChannel {
    url: String,
    headers: Headers,
    sender: Arc<dyn HttpSender>,
    ids: RequestIdCounter,
}

impl CallChannel {
    /// Create a channel for `url` backed by `reqwest`.
    pub fn new(url: impl Into<String>, config: CallChannelConfig) -> Result<Self, TransportError> {
        let sender = ReqwestSender::new(config.connect_timeout)?;
        Ok(Self::with_sender(url, config.headers, Arc::new(sender)))
    }

    /// Create a channel over a caller-supplied transport.
    pub fn with_sender(
        url: impl Into<String>,
        headers: Headers,
        sender: Arc<dyn HttpSender>,
    ) -> Self {
        Self {
            url: url.into(),
            headers,
            sender,
            ids: RequestIdCounter::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Call `method` and decode the result data into `T`.
    ///
    /// Metadata is only returned when `with_metadata` is set and the node
    /// supplied it.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        with_metadata: bool,
        options: CallOptions,
    ) -> CallResult<T> {
        if method.trim().is_empty() {
            let context = TraceContext::new(&self.url, self.headers.clone(), "");
            return CallResult::from_error(
                &TransportError::InvalidRequest("method name must not be empty".into()),
                context,
            );
        }

        let id = self.ids.next_id();
        let req = JsonRpcRequest::new(id, method, params);
        let body = match serde_json::to_string(&req) {
            Ok(body) => body,
            Err(e) => {
                let context = TraceContext::new(&self.url, self.headers.clone(), "");
                return CallResult::from_error(&TransportError::Deserialization(e), context);
            }
        };
        let context = TraceContext::new(&self.url, self.headers.clone(), body.clone());

        tracing::debug!(url = %self.url, method, id, "sending call");

        let resp = match self.exchange(id, body, options.timeout).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(url = %self.url, method, id, error = %e, "call failed");
                return CallResult::from_error(&e, context);
            }
        };

        CallResult::from_response(resp, with_metadata, context)
    }

    /// Send one envelope and return the correlated response.
    async fn exchange(
        &self,
        id: u64,
        body: String,
        timeout: Option<Duration>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let pending = self.sender.post(&self.url, &self.headers, body);
        let resp = match timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| TransportError::Timeout {
                    ms: limit.as_millis() as u64,
                })??,
            None => pending.await?,
        };

        if !resp.is_success() {
            return Err(TransportError::Http(format!(
                "HTTP {}: {}",
                resp.status, resp.body
            )));
        }

        let parsed: JsonRpcResponse = serde_json::from_str(&resp.body)?;
        if parsed.id != RpcId::Number(id) {
            return Err(TransportError::Other(format!(
                "response id {} does not match request id {id}",
                parsed.id
            )));
        }
        Ok(parsed)
    }
}

impl std::fmt::Debug for CallChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallChannel")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use noderpc_core::codes;
    use noderpc_core::transport::HttpResponse;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the first param back as data after a per-method delay.
    struct EchoSender {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpSender for EchoSender {
        async fn post(
            &self,
            _url: &str,
            _headers: &Headers,
            body: String,
        ) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let req: JsonRpcRequest = serde_json::from_str(&body)?;
            match req.method.as_str() {
                "hang" => futures::future::pending::<()>().await,
                "slow" => tokio::time::sleep(Duration::from_millis(60)).await,
                "medium" => tokio::time::sleep(Duration::from_millis(30)).await,
                "status" => {
                    return Ok(HttpResponse {
                        status: 503,
                        body: "unavailable".into(),
                    })
                }
                _ => {}
            }
            let data = req.params.first().cloned().unwrap_or(Value::Null);
            let body = json!({
                "jsonrpc": "2.0",
                "id": req.id,
                "result": {"data": data, "metadata": {"blockNumber": 7, "blockHash": "0x01"}}
            });
            Ok(HttpResponse {
                status: 200,
                body: body.to_string(),
            })
        }
    }

    fn channel() -> CallChannel {
        CallChannel::with_sender(
            "http://node.test",
            Headers::new(),
            Arc::new(EchoSender {
                calls: AtomicUsize::new(0),
            }),
        )
    }

    #[tokio::test]
    async fn concurrent_calls_get_their_own_response() {
        let ch = channel();
        let (a, b, c) = tokio::join!(
            ch.call::<String>("slow", vec![json!("a")], false, CallOptions::default()),
            ch.call::<String>("medium", vec![json!("b")], false, CallOptions::default()),
            ch.call::<String>("fast", vec![json!("c")], false, CallOptions::default()),
        );
        assert_eq!(a.data().map(String::as_str), Some("a"));
        assert_eq!(b.data().map(String::as_str), Some("b"));
        assert_eq!(c.data().map(String::as_str), Some("c"));

        let ids: std::collections::HashSet<u64> = [a, b, c]
            .iter()
            .map(|r| {
                let sent: JsonRpcRequest = serde_json::from_str(&r.context().body).unwrap();
                sent.id.as_u64().unwrap()
            })
            .collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn timeout_yields_timeout_code_and_channel_stays_usable() {
        let ch = channel();
        let res: CallResult<Value> = ch
            .call(
                "hang",
                vec![],
                false,
                CallOptions::with_timeout(Duration::from_millis(20)),
            )
            .await;
        assert_eq!(res.error().map(|e| e.code), Some(codes::TIMEOUT));

        let res: CallResult<u64> = ch
            .call("fast", vec![json!(5)], false, CallOptions::default())
            .await;
        assert_eq!(res.data(), Some(&5));
    }

    #[tokio::test]
    async fn metadata_only_when_requested() {
        let ch = channel();
        let without: CallResult<u64> = ch
            .call("fast", vec![json!(1)], false, CallOptions::default())
            .await;
        assert!(without.metadata().is_none());

        let with: CallResult<u64> = ch
            .call("fast", vec![json!(1)], true, CallOptions::default())
            .await;
        assert_eq!(with.metadata().unwrap()["blockNumber"], 7);
    }

    #[tokio::test]
    async fn bad_status_is_transport_failure() {
        let ch = channel();
        let res: CallResult<Value> = ch
            .call("status", vec![], false, CallOptions::default())
            .await;
        let err = res.error().unwrap();
        assert_eq!(err.code, codes::TRANSPORT);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn empty_method_fails_without_sending() {
        let sender = Arc::new(EchoSender {
            calls: AtomicUsize::new(0),
        });
        let ch = CallChannel::with_sender("http://node.test", Headers::new(), sender.clone());
        let res: CallResult<Value> = ch.call("  ", vec![], false, CallOptions::default()).await;
        assert_eq!(res.error().map(|e| e.code), Some(codes::INVALID_REQUEST));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn context_records_request() {
        let mut headers = Headers::new();
        headers.insert("Authorization".into(), "Bearer s3cret".into());
        let ch = CallChannel::with_sender(
            "http://node.test",
            headers,
            Arc::new(EchoSender {
                calls: AtomicUsize::new(0),
            }),
        );
        let res: CallResult<u64> = ch
            .call("fast", vec![json!(3)], false, CallOptions::default())
            .await;
        let ctx = res.context();
        assert_eq!(ctx.url, "http://node.test");
        assert_eq!(ctx.headers["Authorization"], "Bearer s3cret");
        let sent: Value = serde_json::from_str(&ctx.body).unwrap();
        assert_eq!(sent["method"], "fast");
        assert_eq!(sent["jsonrpc"], "2.0");
    }
}
