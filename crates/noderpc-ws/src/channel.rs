//! Subscription channel: one shared streaming connection, many subscriptions.
//!
//! The connection is opened on first use and only written to after the
//! transport reports it ready. A dispatcher task per connection reads every
//! inbound frame: responses resolve pending requests by id (acks register
//! their route before the next frame is looked at), pushes are routed by
//! subscription id. When the connection closes or errors, pending requests
//! fail and every open subscription gets one terminal failure delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use noderpc_core::error::TransportError;
use noderpc_core::request::{Inbound, JsonRpcRequest, JsonRpcResponse, RequestIdCounter, SubscriptionId};
use noderpc_core::result::{CallFailure, CallOptions, CallResult, TraceContext};
use noderpc_core::transport::{Headers, StreamConnection, StreamEvent, StreamSender, StreamTransport};

use crate::stream::TungsteniteTransport;
use crate::subscriptions::{Dispatch, SubscribeOptions, Subscription, SubscriptionManager, SubscriptionState};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Configuration for [`SubscriptionChannel`].
#[derive(Debug, Clone)]
pub struct SubscriptionChannelConfig {
    /// Headers sent with the connection handshake.
    pub headers: Headers,
    /// How long to wait for the connection to become ready.
    pub connect_timeout: Duration,
}

impl Default for SubscriptionChannelConfig {
    fn default() -> Self {
        Self {
            headers: Headers::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

enum PendingKind {
    Call(oneshot::Sender<Result<JsonRpcResponse, TransportError>>),
    Subscribe {
        state: Arc<SubscriptionState>,
        tx: oneshot::Sender<Result<SubscriptionId, TransportError>>,
    },
}

struct Pending {
    connection: u64,
    kind: PendingKind,
}

impl Pending {
    fn fail(self, err: TransportError) {
        match self.kind {
            PendingKind::Call(tx) => {
                let _ = tx.send(Err(err));
            }
            PendingKind::Subscribe { tx, .. } => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// A ready connection. Writes are refused once it is no longer ready.
struct Connection {
    generation: u64,
    sender: Box<dyn StreamSender>,
    ready: AtomicBool,
    closed: AtomicBool,
}

impl Connection {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(TransportError::NotReady);
        }
        self.sender.send_text(text)
    }

    fn shutdown(&self) {
        self.ready.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.sender.close();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) struct Shared {
    url: String,
    headers: Headers,
    transport: Arc<dyn StreamTransport>,
    connect_timeout: Duration,
    ids: RequestIdCounter,
    generations: AtomicU64,
    pub(crate) routes: SubscriptionManager,
    pending: Mutex<HashMap<u64, Pending>>,
    conn: Mutex<Option<Arc<Connection>>>,
    connecting: tokio::sync::Mutex<()>,
}

impl Shared {
    fn current(&self) -> Option<Arc<Connection>> {
        lock(&self.conn)
            .as_ref()
            .filter(|c| c.ready.load(Ordering::SeqCst))
            .cloned()
    }

    /// Return the ready connection, opening one if needed.
    async fn ensure_connected(self: &Arc<Self>) -> Result<Arc<Connection>, TransportError> {
        if let Some(conn) = self.current() {
            return Ok(conn);
        }
        let _opening = self.connecting.lock().await;
        if let Some(conn) = self.current() {
            return Ok(conn);
        }

        let StreamConnection { sender, mut events } =
            self.transport.open(&self.url, &self.headers).await?;

        let ready = async {
            loop {
                match events.recv().await {
                    Some(StreamEvent::Open) => return Ok(()),
                    Some(StreamEvent::Error(reason)) => return Err(TransportError::WebSocket(reason)),
                    Some(StreamEvent::Close) | None => {
                        return Err(TransportError::ConnectionClosed(
                            "closed before becoming ready".into(),
                        ))
                    }
                    Some(StreamEvent::Message(_)) => {
                        tracing::debug!(url = %self.url, "ignoring frame received before ready");
                    }
                }
            }
        };
        let outcome = tokio::time::timeout(self.connect_timeout, ready)
            .await
            .unwrap_or(Err(TransportError::Timeout {
                ms: self.connect_timeout.as_millis() as u64,
            }));
        if let Err(e) = outcome {
            tracing::warn!(url = %self.url, error = %e, "stream did not become ready");
            sender.close();
            return Err(e);
        }

        let conn = Arc::new(Connection {
            generation: self.generations.fetch_add(1, Ordering::SeqCst) + 1,
            sender,
            ready: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        *lock(&self.conn) = Some(conn.clone());
        tracing::info!(url = %self.url, connection = conn.generation, "stream ready");

        tokio::spawn(dispatch_loop(Arc::downgrade(self), conn.clone(), events));
        Ok(conn)
    }

    /// Register `pending` under `id` and write `body`.
    ///
    /// Holding the connection slot keeps this atomic with respect to
    /// [`release_if_idle`](Self::release_if_idle).
    fn register_and_send(
        &self,
        conn: &Arc<Connection>,
        id: u64,
        kind: PendingKind,
        body: String,
    ) -> Result<(), TransportError> {
        let slot = lock(&self.conn);
        let current = slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn));
        if !current || !conn.ready.load(Ordering::SeqCst) {
            return Err(TransportError::NotReady);
        }
        if let PendingKind::Subscribe { state, .. } = &kind {
            state.bind(conn.generation);
        }
        lock(&self.pending).insert(
            id,
            Pending {
                connection: conn.generation,
                kind,
            },
        );
        if let Err(e) = conn.send(body) {
            lock(&self.pending).remove(&id);
            return Err(e);
        }
        Ok(())
    }

    /// Close the connection if no subscription or request still needs it.
    pub(crate) fn release_if_idle(&self) {
        let mut slot = lock(&self.conn);
        let idle = {
            let pending = lock(&self.pending);
            pending.is_empty() && self.routes.is_empty()
        };
        if idle {
            if let Some(conn) = slot.take() {
                tracing::info!(url = %self.url, connection = conn.generation, "releasing idle stream");
                conn.shutdown();
            }
        }
    }

    fn handle_message(&self, text: &str) {
        match Inbound::parse(text) {
            Err(e) => tracing::debug!(error = %e, "ignoring non-JSON frame"),
            Ok(Inbound::Other(_)) => tracing::debug!("ignoring unrecognised frame"),
            Ok(Inbound::Push(push)) => {
                if self.routes.dispatch(push.params) == Dispatch::DeliveredAndClosed {
                    self.release_if_idle();
                }
            }
            Ok(Inbound::Response(resp)) => self.handle_response(resp),
            Ok(Inbound::Malformed { id, error }) => {
                tracing::warn!(url = %self.url, id = %id, error = %error, "undecodable response");
                let entry = id.as_u64().and_then(|id| lock(&self.pending).remove(&id));
                if let Some(entry) = entry {
                    entry.fail(TransportError::Deserialization(error));
                }
            }
        }
    }

    fn handle_response(&self, resp: JsonRpcResponse) {
        let Some(id) = resp.id.as_u64() else {
            tracing::debug!(id = %resp.id, "ignoring response with non-numeric id");
            return;
        };

        // The route is registered while the pending lock is held so the
        // connection never looks idle in between.
        let mut pending = lock(&self.pending);
        let Some(entry) = pending.remove(&id) else {
            tracing::debug!(id, "ignoring response for unknown request");
            return;
        };

        match entry.kind {
            PendingKind::Call(tx) => {
                let _ = tx.send(Ok(resp));
            }
            PendingKind::Subscribe { state, tx } => {
                let outcome = match resp.into_result() {
                    Err(err) => Err(TransportError::Rpc(err)),
                    Ok(result) => match SubscriptionId::from_ack(&result) {
                        None => Err(TransportError::Other(format!(
                            "acknowledgement without subscription id: {result}"
                        ))),
                        Some(sub_id) => {
                            if state.assign_id(sub_id.clone())
                                && self.routes.register(sub_id.clone(), state.clone())
                            {
                                Ok(sub_id)
                            } else {
                                Err(TransportError::Other(format!(
                                    "subscription id {sub_id} is already in use"
                                )))
                            }
                        }
                    },
                };
                let _ = tx.send(outcome);
            }
        }
    }

    /// Fail everything bound to `conn` after it closed or errored.
    fn teardown(&self, conn: &Arc<Connection>, reason: &str) {
        conn.ready.store(false, Ordering::SeqCst);
        {
            let mut slot = lock(&self.conn);
            if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
                slot.take();
            }
        }

        let failed: Vec<Pending> = {
            let mut pending = lock(&self.pending);
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.connection == conn.generation)
                .map(|(id, _)| *id)
                .collect();
            let removed: Vec<Pending> = ids.iter().filter_map(|id| pending.remove(id)).collect();
            removed
        };
        for entry in failed {
            entry.fail(TransportError::ConnectionClosed(reason.to_string()));
        }

        let orphaned = self.routes.drain_connection(conn.generation);
        if !orphaned.is_empty() {
            tracing::warn!(
                url = %self.url,
                subscriptions = orphaned.len(),
                reason,
                "stream lost, closing subscriptions"
            );
        }
        for state in orphaned {
            let err = TransportError::ConnectionClosed(reason.to_string());
            state.deliver(CallResult::from_error(&err, state.context().clone()));
            state.mark_closed();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let slot = self
            .conn
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(conn) = slot.take() {
            conn.shutdown();
        }
    }
}

/// Dispatcher task: one per connection.
async fn dispatch_loop(
    shared: Weak<Shared>,
    conn: Arc<Connection>,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
) {
    let reason = loop {
        let Some(event) = events.recv().await else {
            break "stream ended".to_string();
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match event {
            StreamEvent::Message(text) => shared.handle_message(&text),
            StreamEvent::Error(reason) => break reason,
            StreamEvent::Close => break "connection closed".to_string(),
            StreamEvent::Open => {}
        }
    };

    if let Some(shared) = shared.upgrade() {
        shared.teardown(&conn, &reason);
    }
}

/// Cleans up a sent request whose caller stopped waiting.
///
/// Removes the pending entry and, for a subscribe, closes the state and any
/// route an ack registered in the meantime. Disarmed once the caller owns
/// the result.
struct PendingGuard {
    shared: Arc<Shared>,
    id: u64,
    state: Option<Arc<SubscriptionState>>,
    armed: bool,
}

impl PendingGuard {
    fn new(shared: Arc<Shared>, id: u64, state: Option<Arc<SubscriptionState>>) -> Self {
        Self {
            shared,
            id,
            state,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // An ack registers its route under the pending lock, so once the
        // entry is gone any route for this state is visible below.
        lock(&self.shared.pending).remove(&self.id);
        let Some(state) = &self.state else {
            return;
        };
        state.mark_closed();
        if let Some(sub_id) = state.id() {
            if self.shared.routes.remove_if_same(sub_id, state) {
                tracing::debug!(subscription = %sub_id, "dropping route of abandoned subscribe");
            }
        }
        self.shared.release_if_idle();
    }
}

/// Streaming JSON-RPC channel for subscriptions (and calls over the stream).
///
/// Cloning is cheap; clones share the connection, id counter and routes.
#[derive(Clone)]
pub struct SubscriptionChannel {
    shared: Arc<Shared>,
}

impl SubscriptionChannel {
    /// Create a channel for `url` backed by `tokio-tungstenite`.
    pub fn new(url: impl Into<String>, config: SubscriptionChannelConfig) -> Self {
        Self::with_transport(url, config, Arc::new(TungsteniteTransport))
    }

    /// Create a channel over a caller-supplied stream transport.
    pub fn with_transport(
        url: impl Into<String>,
        config: SubscriptionChannelConfig,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                headers: config.headers,
                transport,
                connect_timeout: config.connect_timeout,
                ids: RequestIdCounter::new(),
                generations: AtomicU64::new(0),
                routes: SubscriptionManager::new(),
                pending: Mutex::new(HashMap::new()),
                conn: Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Number of subscriptions with a live route.
    pub fn active_subscriptions(&self) -> usize {
        self.shared.routes.len()
    }

    /// Number of requests awaiting a response or acknowledgement.
    pub fn pending_requests(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Returns `true` if a ready connection is held.
    pub fn is_connected(&self) -> bool {
        self.shared.current().is_some()
    }

    fn prepare(&self, method: &str, params: Vec<Value>) -> Result<(u64, JsonRpcRequest, String, TraceContext), CallFailure> {
        let empty_context = || TraceContext::new(&self.shared.url, self.shared.headers.clone(), "");
        if method.trim().is_empty() {
            let err = TransportError::InvalidRequest("method name must not be empty".into());
            return Err(CallFailure::from_error(&err, empty_context()));
        }
        let id = self.shared.ids.next_id();
        let req = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_string(&req)
            .map_err(|e| CallFailure::from_error(&TransportError::Deserialization(e), empty_context()))?;
        let context = TraceContext::new(&self.shared.url, self.shared.headers.clone(), body.clone());
        Ok((id, req, body, context))
    }

    /// Subscribe to `method` and wait for the node to acknowledge it.
    ///
    /// The returned handle already has its subscription id; register a
    /// callback with [`Subscription::next`] to start receiving pushes.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
        options: SubscribeOptions,
    ) -> Result<Subscription, CallFailure> {
        let (id, req, body, context) = self.prepare(method, params)?;
        let ack_timeout = options.timeout;

        let conn = self
            .shared
            .ensure_connected()
            .await
            .map_err(|e| CallFailure::from_error(&e, context.clone()))?;

        let state = Arc::new(SubscriptionState::new(req, context.clone(), options));
        let (tx, rx) = oneshot::channel();
        let kind = PendingKind::Subscribe {
            state: state.clone(),
            tx,
        };
        if let Err(e) = self.shared.register_and_send(&conn, id, kind, body) {
            tracing::warn!(url = %self.shared.url, method, id, error = %e, "subscribe send failed");
            self.shared.release_if_idle();
            return Err(CallFailure::from_error(&e, context));
        }
        tracing::debug!(url = %self.shared.url, method, id, "subscribe sent");
        let guard = PendingGuard::new(self.shared.clone(), id, Some(state.clone()));

        let outcome = match ack_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    drop(guard);
                    let err = TransportError::Timeout {
                        ms: limit.as_millis() as u64,
                    };
                    return Err(CallFailure::from_error(&err, context));
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(Ok(sub_id)) => {
                tracing::info!(url = %self.shared.url, method, subscription = %sub_id, "subscribed");
                let subscription = Subscription::new(state, self.shared.clone());
                guard.disarm();
                Ok(subscription)
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %self.shared.url, method, id, error = %e, "subscribe rejected");
                Err(CallFailure::from_error(&e, context))
            }
            Err(_) => {
                let err = TransportError::ConnectionClosed("subscribe request dropped".into());
                Err(CallFailure::from_error(&err, context))
            }
        }
    }

    /// Issue a request/response call over the streaming connection.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        with_metadata: bool,
        options: CallOptions,
    ) -> CallResult<T> {
        let (id, _req, body, context) = match self.prepare(method, params) {
            Ok(prepared) => prepared,
            Err(failure) => return CallResult::Failure(failure),
        };

        let conn = match self.shared.ensure_connected().await {
            Ok(conn) => conn,
            Err(e) => return CallResult::from_error(&e, context),
        };

        let (tx, rx) = oneshot::channel();
        if let Err(e) = self.shared.register_and_send(&conn, id, PendingKind::Call(tx), body) {
            return CallResult::from_error(&e, context);
        }

        let guard = PendingGuard::new(self.shared.clone(), id, None);

        let received = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    drop(guard);
                    let err = TransportError::Timeout {
                        ms: limit.as_millis() as u64,
                    };
                    return CallResult::from_error(&err, context);
                }
            },
            None => rx.await,
        };
        guard.disarm();

        match received {
            Ok(Ok(resp)) => CallResult::from_response(resp, with_metadata, context),
            Ok(Err(e)) => CallResult::from_error(&e, context),
            Err(_) => {
                let err = TransportError::ConnectionClosed("request dropped".into());
                CallResult::from_error(&err, context)
            }
        }
    }

    /// Close the connection. The dispatcher then fails pending requests and
    /// sends open subscriptions their terminal failure delivery.
    pub fn disconnect(&self) {
        let conn = lock(&self.shared.conn).take();
        if let Some(conn) = conn {
            tracing::info!(url = %self.shared.url, connection = conn.generation, "disconnecting");
            conn.shutdown();
        }
    }
}

impl std::fmt::Debug for SubscriptionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionChannel")
            .field("url", &self.shared.url)
            .field("subscriptions", &self.shared.routes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::PushResult;
    use crate::testing::MockStreamTransport;
    use noderpc_core::codes;
    use serde_json::json;

    fn channel(mock: &MockStreamTransport) -> SubscriptionChannel {
        channel_with(mock, SubscriptionChannelConfig::default())
    }

    fn channel_with(mock: &MockStreamTransport, config: SubscriptionChannelConfig) -> SubscriptionChannel {
        SubscriptionChannel::with_transport("ws://node:8648/ws", config, Arc::new(mock.clone()))
    }

    fn push(sub_id: u64, result: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "subscribeForBlocks",
            "params": { "subscription": sub_id, "result": result }
        })
    }

    /// Subscribe and acknowledge with `sub_id`.
    async fn subscribed(
        ch: &SubscriptionChannel,
        mock: &MockStreamTransport,
        sub_id: u64,
        options: SubscribeOptions,
    ) -> Subscription {
        let before = mock.sent().len();
        let task = tokio::spawn({
            let ch = ch.clone();
            async move { ch.subscribe("subscribeForBlocks", vec![json!("FULL")], options).await }
        });
        let sent = mock.wait_for_sent(before + 1).await;
        let req = &sent[before];
        mock.inject(json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "result": { "subscriptionId": sub_id }
        }));
        task.await.unwrap().unwrap()
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<PushResult>) -> Option<PushResult> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivery within a second")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn routes_pushes_by_acknowledged_id() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let sub = subscribed(&ch, &mock, 42, SubscribeOptions::new()).await;

        let sent = mock.sent();
        assert_eq!(sent[0]["method"], "subscribeForBlocks");
        assert_eq!(sent[0]["params"], json!(["FULL"]));
        assert_eq!(sub.subscription_id(), Some(&SubscriptionId::Number(42)));
        assert_eq!(ch.active_subscriptions(), 1);

        let mut rx = sub.receiver();
        mock.inject(push(42, json!({ "data": "0xabc" })));
        let delivered = recv(&mut rx).await.unwrap();
        assert_eq!(delivered.data(), Some(&json!("0xabc")));
        assert_eq!(delivered.context().url, "ws://node:8648/ws");
    }

    #[tokio::test]
    async fn pushes_for_other_ids_are_ignored() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let sub = subscribed(&ch, &mock, 1, SubscribeOptions::new()).await;
        let mut rx = sub.receiver();

        mock.inject(push(2, json!({ "data": "other" })));
        mock.inject(push(1, json!({ "data": "mine" })));
        assert_eq!(recv(&mut rx).await.unwrap().data(), Some(&json!("mine")));
    }

    #[tokio::test]
    async fn once_delivers_a_single_push_and_releases_the_stream() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let sub = subscribed(&ch, &mock, 7, SubscribeOptions::new().once()).await;
        let mut rx = sub.receiver();

        mock.inject(push(7, json!({ "data": 1 })));
        mock.inject(push(7, json!({ "data": 2 })));

        assert_eq!(recv(&mut rx).await.unwrap().data(), Some(&json!(1)));
        assert!(recv(&mut rx).await.is_none());
        settle().await;
        assert!(!sub.is_open());
        assert_eq!(ch.active_subscriptions(), 0);
        assert!(!ch.is_connected());
        assert_eq!(mock.client_closes(), 1);
    }

    #[tokio::test]
    async fn filter_skips_non_matching_pushes() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let options = SubscribeOptions::new().filter(|data| data["blockNumber"].as_u64() == Some(3));
        let sub = subscribed(&ch, &mock, 5, options).await;
        let mut rx = sub.receiver();

        mock.inject(push(5, json!({ "data": { "blockNumber": 2 } })));
        mock.inject(push(5, json!({ "data": { "blockNumber": 3 } })));

        let delivered = recv(&mut rx).await.unwrap();
        assert_eq!(delivered.data().unwrap()["blockNumber"], 3);
    }

    #[tokio::test]
    async fn error_push_is_delivered_as_failure() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let sub = subscribed(&ch, &mock, 3, SubscribeOptions::new()).await;
        let mut rx = sub.receiver();

        mock.inject(json!({
            "jsonrpc": "2.0",
            "method": "subscribeForBlocks",
            "params": { "subscription": 3, "error": { "code": -32000, "message": "lagged" } }
        }));
        let failure = recv(&mut rx).await.unwrap();
        assert_eq!(failure.error().unwrap().code, -32000);
        assert_eq!(failure.error().unwrap().message, "lagged");
        assert!(sub.is_open());
    }

    #[tokio::test]
    async fn close_discards_later_pushes() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let sub = subscribed(&ch, &mock, 9, SubscribeOptions::new()).await;
        let mut rx = sub.receiver();

        sub.close();
        sub.close();
        mock.inject(push(9, json!({ "data": "late" })));

        assert!(recv(&mut rx).await.is_none());
        assert_eq!(ch.active_subscriptions(), 0);
        assert!(!ch.is_connected());
    }

    #[tokio::test]
    async fn stream_stays_open_while_a_subscription_remains() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let first = subscribed(&ch, &mock, 1, SubscribeOptions::new()).await;
        let second = subscribed(&ch, &mock, 2, SubscribeOptions::new()).await;
        assert_eq!(mock.opens(), 1);

        first.close();
        assert!(ch.is_connected());
        drop(second);
        assert!(!ch.is_connected());
        assert_eq!(mock.client_closes(), 1);
    }

    #[tokio::test]
    async fn transport_close_sends_one_terminal_failure() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let sub = subscribed(&ch, &mock, 11, SubscribeOptions::new()).await;
        let mut rx = sub.receiver();

        mock.close();

        let terminal = recv(&mut rx).await.unwrap();
        assert_eq!(terminal.error().unwrap().code, codes::CONNECTION_CLOSED);
        assert!(recv(&mut rx).await.is_none());
        assert!(!sub.is_open());
        assert_eq!(ch.active_subscriptions(), 0);
        assert!(!ch.is_connected());
    }

    #[tokio::test]
    async fn transport_error_fails_pending_calls() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let task = tokio::spawn({
            let ch = ch.clone();
            async move { ch.call::<Value>("getBlockNumber", vec![], false, CallOptions::no_timeout()).await }
        });
        mock.wait_for_sent(1).await;
        mock.fail("connection reset");

        let result = task.await.unwrap();
        let failure = result.error().unwrap();
        assert_eq!(failure.code, codes::CONNECTION_CLOSED);
        assert!(failure.message.contains("connection reset"));
        assert_eq!(ch.pending_requests(), 0);
    }

    #[tokio::test]
    async fn ack_timeout_leaves_nothing_pending() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let options = SubscribeOptions::new().timeout(Some(Duration::from_millis(50)));

        let failure = ch
            .subscribe("subscribeForBlocks", vec![json!("HASH")], options)
            .await
            .unwrap_err();
        assert!(failure.is_timeout());
        assert_eq!(ch.pending_requests(), 0);
        assert_eq!(ch.active_subscriptions(), 0);
        assert!(!ch.is_connected());
    }

    #[tokio::test]
    async fn rejected_subscribe_passes_server_error_through() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let task = tokio::spawn({
            let ch = ch.clone();
            async move { ch.subscribe("subscribeForNothing", vec![], SubscribeOptions::new()).await }
        });
        let sent = mock.wait_for_sent(1).await;
        mock.inject(json!({
            "jsonrpc": "2.0",
            "id": sent[0]["id"],
            "error": { "code": -32601, "message": "Method not found" }
        }));

        let failure = task.await.unwrap().unwrap_err();
        assert_eq!(failure.code, -32601);
        assert_eq!(failure.message, "Method not found");
        assert_eq!(ch.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn out_of_order_responses_are_correlated() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let call = |method: &'static str| {
            let ch = ch.clone();
            tokio::spawn(async move { ch.call::<String>(method, vec![], false, CallOptions::default()).await })
        };
        let a = call("getBatchNumber");
        mock.wait_for_sent(1).await;
        let b = call("getEpochNumber");
        let sent = mock.wait_for_sent(2).await;
        assert_ne!(sent[0]["id"], sent[1]["id"]);

        for req in sent.iter().rev() {
            mock.inject(json!({ "jsonrpc": "2.0", "id": req["id"], "result": { "data": req["method"] } }));
        }

        assert_eq!(a.await.unwrap().into_data().unwrap(), "getBatchNumber");
        assert_eq!(b.await.unwrap().into_data().unwrap(), "getEpochNumber");
        assert_eq!(ch.pending_requests(), 0);
    }

    #[tokio::test]
    async fn call_timeout_then_late_response_is_ignored() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let result = ch
            .call::<Value>("getBlockNumber", vec![], false, CallOptions::with_timeout(Duration::from_millis(30)))
            .await;
        assert!(result.error().unwrap().is_timeout());
        assert_eq!(ch.pending_requests(), 0);

        let sent = mock.sent();
        mock.inject(json!({ "jsonrpc": "2.0", "id": sent[0]["id"], "result": 1 }));
        settle().await;
        assert!(ch.is_connected());
    }

    #[tokio::test]
    async fn never_ready_stream_times_out_without_writing() {
        let mock = MockStreamTransport::silent();
        let ch = channel_with(
            &mock,
            SubscriptionChannelConfig {
                connect_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let failure = ch
            .subscribe("subscribeForBlocks", vec![], SubscribeOptions::new())
            .await
            .unwrap_err();
        assert_eq!(failure.code, codes::TIMEOUT);
        assert!(mock.sent().is_empty());
        assert_eq!(mock.client_closes(), 1);
        assert!(!ch.is_connected());
    }

    #[tokio::test]
    async fn error_before_ready_fails_without_writing() {
        let mock = MockStreamTransport::refusing("handshake rejected");
        let ch = channel(&mock);

        let failure = ch
            .subscribe("subscribeForBlocks", vec![], SubscribeOptions::new())
            .await
            .unwrap_err();
        assert_eq!(failure.code, codes::TRANSPORT);
        assert!(failure.message.contains("handshake rejected"));
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn empty_method_is_rejected_before_connecting() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let failure = ch
            .subscribe("  ", vec![], SubscribeOptions::new())
            .await
            .unwrap_err();
        assert_eq!(failure.code, codes::INVALID_REQUEST);
        assert_eq!(mock.opens(), 0);
    }

    #[tokio::test]
    async fn reopens_after_release() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let sub = subscribed(&ch, &mock, 1, SubscribeOptions::new()).await;
        sub.close();
        settle().await;

        let again = subscribed(&ch, &mock, 2, SubscribeOptions::new()).await;
        assert_eq!(mock.opens(), 2);
        assert!(again.is_open());
        assert!(ch.is_connected());
    }

    #[tokio::test]
    async fn handshake_carries_configured_headers() {
        let mock = MockStreamTransport::new();
        let mut headers = Headers::new();
        headers.insert("Authorization".into(), "Bearer s3cret".into());
        let ch = channel_with(
            &mock,
            SubscriptionChannelConfig {
                headers,
                ..Default::default()
            },
        );
        let _sub = subscribed(&ch, &mock, 1, SubscribeOptions::new()).await;
        assert_eq!(mock.handshake_headers()[0]["Authorization"], "Bearer s3cret");
    }

    #[tokio::test]
    async fn disconnect_delivers_terminal_failure() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let sub = subscribed(&ch, &mock, 4, SubscribeOptions::new()).await;
        let mut rx = sub.receiver();

        ch.disconnect();
        let terminal = recv(&mut rx).await.unwrap();
        assert_eq!(terminal.error().unwrap().code, codes::CONNECTION_CLOSED);
        assert!(!sub.is_open());
    }

    #[tokio::test]
    async fn abandoned_subscribe_leaves_no_route() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let options = SubscribeOptions::new().timeout(None);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(30),
            ch.subscribe("subscribeForBlocks", vec![], options),
        )
        .await;
        assert!(abandoned.is_err());

        let sent = mock.sent();
        mock.inject(json!({ "jsonrpc": "2.0", "id": sent[0]["id"], "result": { "subscriptionId": 42 } }));
        settle().await;

        assert_eq!(ch.active_subscriptions(), 0);
        assert_eq!(ch.pending_requests(), 0);
        assert!(!ch.is_connected());
    }

    #[tokio::test]
    async fn abandoned_call_leaves_nothing_pending() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(30),
            ch.call::<Value>("getBlockNumber", vec![], false, CallOptions::no_timeout()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(ch.pending_requests(), 0);
    }

    #[tokio::test]
    async fn undecodable_ack_fails_subscribe_with_parse_error() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let task = tokio::spawn({
            let ch = ch.clone();
            async move {
                ch.subscribe("subscribeForBlocks", vec![], SubscribeOptions::new().timeout(None))
                    .await
            }
        });
        let sent = mock.wait_for_sent(1).await;
        mock.inject(json!({ "jsonrpc": "2.0", "id": sent[0]["id"], "error": { "code": "bad" } }));

        let failure = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("subscribe resolves promptly")
            .unwrap()
            .unwrap_err();
        assert_eq!(failure.code, codes::PARSE_ERROR);
        assert_eq!(ch.pending_requests(), 0);
        assert_eq!(ch.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn undecodable_response_fails_call_with_parse_error() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let task = tokio::spawn({
            let ch = ch.clone();
            async move { ch.call::<Value>("getBlockNumber", vec![], false, CallOptions::no_timeout()).await }
        });
        let sent = mock.wait_for_sent(1).await;
        mock.inject(json!({ "jsonrpc": "2.0", "id": sent[0]["id"], "result": 1, "error": { "message": 7 } }));

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("call resolves promptly")
            .unwrap();
        assert_eq!(result.error().unwrap().code, codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn push_right_behind_ack_reaches_initial_callback() {
        let mock = MockStreamTransport::new();
        let ch = channel(&mock);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = SubscribeOptions::new().on_push(move |push| {
            let _ = tx.send(push);
        });

        let task = tokio::spawn({
            let ch = ch.clone();
            async move { ch.subscribe("subscribeForBlocks", vec![], options).await }
        });
        let sent = mock.wait_for_sent(1).await;
        mock.inject(json!({ "jsonrpc": "2.0", "id": sent[0]["id"], "result": 8 }));
        mock.inject(push(8, json!({ "data": "first" })));

        let _sub = task.await.unwrap().unwrap();
        assert_eq!(recv(&mut rx).await.unwrap().data(), Some(&json!("first")));
    }
}
