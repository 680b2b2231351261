//! The [`NodeClient`] facade.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use noderpc_core::error::TransportError;
use noderpc_core::result::{CallFailure, CallOptions, CallResult, TraceContext};
use noderpc_core::transport::{HttpSender, StreamTransport};
use noderpc_http::{CallChannel, ReqwestSender};
use noderpc_ws::{
    SubscribeOptions, Subscription, SubscriptionChannel, SubscriptionChannelConfig,
    TungsteniteTransport,
};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::methods::{
    BlockchainMethods, ConsensusMethods, MempoolMethods, NetworkMethods, PolicyMethods,
};
use crate::params::ParamError;

/// Client for one node: a call channel plus a subscription channel.
pub struct NodeClient {
    calls: CallChannel,
    streams: SubscriptionChannel,
    options: CallOptions,
    with_metadata: bool,
}

impl NodeClient {
    /// Build a client using `reqwest` for calls and `tokio-tungstenite` for
    /// subscriptions.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let sender = ReqwestSender::new(config.connect_timeout())?;
        Self::with_transports(config, Arc::new(sender), Arc::new(TungsteniteTransport))
    }

    /// Build a client over caller-supplied transports.
    pub fn with_transports(
        config: ClientConfig,
        sender: Arc<dyn HttpSender>,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<Self, ClientError> {
        let http_url = config.http_url()?;
        let stream_url = config.stream_url()?;
        let headers = config.headers();

        tracing::debug!(url = %http_url, stream = %stream_url, "building node client");

        let calls = CallChannel::with_sender(http_url, headers.clone(), sender);
        let streams = SubscriptionChannel::with_transport(
            stream_url,
            SubscriptionChannelConfig {
                headers,
                connect_timeout: config.connect_timeout(),
            },
            transport,
        );
        Ok(Self {
            calls,
            streams,
            options: config.call_options(),
            with_metadata: config.with_metadata,
        })
    }

    /// Default per-call options from the configuration.
    pub fn options(&self) -> CallOptions {
        self.options
    }

    /// Subscribe options carrying the configured acknowledgement timeout.
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions::new().timeout(self.options.timeout)
    }

    pub fn call_channel(&self) -> &CallChannel {
        &self.calls
    }

    pub fn subscription_channel(&self) -> &SubscriptionChannel {
        &self.streams
    }

    pub fn blockchain(&self) -> BlockchainMethods<'_> {
        BlockchainMethods::new(self)
    }

    pub fn consensus(&self) -> ConsensusMethods<'_> {
        ConsensusMethods::new(self)
    }

    pub fn mempool(&self) -> MempoolMethods<'_> {
        MempoolMethods::new(self)
    }

    pub fn network(&self) -> NetworkMethods<'_> {
        NetworkMethods::new(self)
    }

    pub fn policy(&self) -> PolicyMethods<'_> {
        PolicyMethods::new(self)
    }

    /// Call `method` on the call channel.
    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        options: CallOptions,
    ) -> CallResult<T> {
        self.calls.call(method, params, self.with_metadata, options).await
    }

    /// Validate, then call `method`.
    pub(crate) async fn checked_request<T: DeserializeOwned>(
        &self,
        method: &str,
        check: Result<(), ParamError>,
        params: impl FnOnce() -> Vec<Value>,
        options: CallOptions,
    ) -> CallResult<T> {
        match check {
            Ok(()) => self.request(method, params(), options).await,
            Err(e) => CallResult::Failure(self.rejected(method, e)),
        }
    }

    /// Subscribe on the subscription channel.
    pub(crate) async fn open_subscription(
        &self,
        method: &str,
        params: Vec<Value>,
        options: SubscribeOptions,
    ) -> Result<Subscription, CallFailure> {
        self.streams.subscribe(method, params, options).await
    }

    /// Failure for a call whose parameters did not validate. Nothing is sent.
    pub(crate) fn rejected(&self, method: &str, err: ParamError) -> CallFailure {
        tracing::debug!(method, error = %err, "rejecting call with invalid params");
        let context = TraceContext::new(self.calls.url(), self.calls.headers().clone(), "");
        CallFailure::from_error(&TransportError::from(err), context)
    }
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("url", &self.calls.url())
            .field("stream_url", &self.streams.url())
            .field("options", &self.options)
            .field("with_metadata", &self.with_metadata)
            .finish()
    }
}
