//! Subscription routing and delivery.
//!
//! The [`SubscriptionManager`] maps server-assigned subscription ids to their
//! shared state. Each state owns the replaceable delivery callback, the
//! optional filter and the `once` flag; the dispatcher task is the only caller
//! of [`SubscriptionManager::dispatch`], so pushes for one subscription are
//! delivered one at a time and in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use noderpc_core::request::{JsonRpcRequest, PushParams, SubscriptionId};
use noderpc_core::result::{split_result, CallResult, TraceContext, DEFAULT_TIMEOUT};

use crate::channel::Shared;

/// What a subscription callback receives: push data or a failure.
pub type PushResult = CallResult<Value>;

type Callback = Box<dyn FnMut(PushResult) + Send + 'static>;
type Filter = Arc<dyn Fn(&Value) -> bool + Send + Sync + 'static>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Options for [`SubscriptionChannel::subscribe`](crate::SubscriptionChannel::subscribe).
pub struct SubscribeOptions {
    /// Deliver at most one matching push, then close.
    pub once: bool,
    /// Client-side predicate on the push data; `false` skips the push.
    pub filter: Option<Filter>,
    /// How long to wait for the acknowledgement. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Callback installed before the subscribe is sent.
    on_push: Option<Callback>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn filter(mut self, predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(predicate));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deliver to `callback` from the moment the route exists.
    ///
    /// Pushes the node sends right behind its acknowledgement reach this
    /// callback; ones arriving before a later [`Subscription::next`] would
    /// otherwise be dropped.
    pub fn on_push(mut self, callback: impl FnMut(PushResult) + Send + 'static) -> Self {
        self.on_push = Some(Box::new(callback));
        self
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            once: false,
            filter: None,
            timeout: Some(DEFAULT_TIMEOUT),
            on_push: None,
        }
    }
}

impl std::fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("once", &self.once)
            .field("filter", &self.filter.is_some())
            .field("timeout", &self.timeout)
            .field("on_push", &self.on_push.is_some())
            .finish()
    }
}

/// State shared between a [`Subscription`] handle and its routing entry.
pub(crate) struct SubscriptionState {
    id: OnceLock<SubscriptionId>,
    request: JsonRpcRequest,
    context: TraceContext,
    once: bool,
    filter: Option<Filter>,
    open: AtomicBool,
    connection: AtomicU64,
    callback: Mutex<Option<Callback>>,
}

impl SubscriptionState {
    pub(crate) fn new(request: JsonRpcRequest, context: TraceContext, options: SubscribeOptions) -> Self {
        Self {
            id: OnceLock::new(),
            request,
            context,
            once: options.once,
            filter: options.filter,
            open: AtomicBool::new(true),
            connection: AtomicU64::new(0),
            callback: Mutex::new(options.on_push),
        }
    }

    pub(crate) fn id(&self) -> Option<&SubscriptionId> {
        self.id.get()
    }

    /// Set the server-assigned id. Returns `false` if one was already set.
    pub(crate) fn assign_id(&self, id: SubscriptionId) -> bool {
        self.id.set(id).is_ok()
    }

    pub(crate) fn context(&self) -> &TraceContext {
        &self.context
    }

    pub(crate) fn bind(&self, connection: u64) {
        self.connection.store(connection, Ordering::SeqCst);
    }

    pub(crate) fn connection(&self) -> u64 {
        self.connection.load(Ordering::SeqCst)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn has_callback(&self) -> bool {
        lock(&self.callback).is_some()
    }

    fn set_callback(&self, callback: Callback) {
        let mut slot = lock(&self.callback);
        if self.is_open() {
            *slot = Some(callback);
        }
    }

    /// Mark closed and drop the callback. Returns `true` on the first call.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut slot = lock(&self.callback);
        let was_open = self.open.swap(false, Ordering::SeqCst);
        slot.take();
        was_open
    }

    /// Hand `result` to the callback. The callback runs without any lock held,
    /// so it may call `next` or `close` on its own subscription.
    pub(crate) fn deliver(&self, result: PushResult) -> bool {
        let mut callback = {
            let mut slot = lock(&self.callback);
            if !self.is_open() {
                return false;
            }
            match slot.take() {
                Some(cb) => cb,
                None => return false,
            }
        };

        callback(result);

        let mut slot = lock(&self.callback);
        if slot.is_none() && self.is_open() {
            *slot = Some(callback);
        }
        true
    }

    fn push_result(&self, params: PushParams) -> PushResult {
        if let Some(err) = params.error {
            return CallResult::failure(err.code, err.message, self.context.clone());
        }
        let (data, metadata) = split_result(params.result.unwrap_or(Value::Null));
        CallResult::success(data, metadata, self.context.clone())
    }
}

/// Outcome of routing one push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No open subscription has that id, or it has no callback yet.
    Dropped,
    /// The filter rejected the push.
    Filtered,
    /// Delivered; the subscription stays open.
    Delivered,
    /// Delivered as the single `once` delivery; the subscription is closed.
    DeliveredAndClosed,
}

/// Routing table of active subscriptions.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<HashMap<SubscriptionId, Arc<SubscriptionState>>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Refuses to replace an id owned by an open subscription.
    pub(crate) fn register(&self, id: SubscriptionId, state: Arc<SubscriptionState>) -> bool {
        let mut entries = lock(&self.entries);
        if entries.get(&id).is_some_and(|existing| existing.is_open()) {
            return false;
        }
        entries.insert(id, state);
        true
    }

    /// Remove the route for `id` only if it still points at `state`.
    pub(crate) fn remove_if_same(&self, id: &SubscriptionId, state: &Arc<SubscriptionState>) -> bool {
        let mut entries = lock(&self.entries);
        match entries.get(id) {
            Some(existing) if Arc::ptr_eq(existing, state) => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Remove and return every route bound to `connection`.
    pub(crate) fn drain_connection(&self, connection: u64) -> Vec<Arc<SubscriptionState>> {
        let mut entries = lock(&self.entries);
        let ids: Vec<SubscriptionId> = entries
            .iter()
            .filter(|(_, state)| state.connection() == connection)
            .map(|(id, _)| id.clone())
            .collect();
        let drained: Vec<_> = ids.iter().filter_map(|id| entries.remove(id)).collect();
        drained
    }

    /// Route a push to its subscription.
    pub fn dispatch(&self, params: PushParams) -> Dispatch {
        let id = params.subscription.clone();
        let Some(state) = lock(&self.entries).get(&id).cloned() else {
            tracing::debug!(subscription = %id, "dropping push for unknown subscription");
            return Dispatch::Dropped;
        };

        let result = state.push_result(params);

        // Error pushes carry no data and always pass the filter.
        if let (Some(filter), Some(data)) = (&state.filter, result.data()) {
            if !filter(data) {
                return Dispatch::Filtered;
            }
        }

        if !state.has_callback() {
            tracing::debug!(subscription = %id, "no callback registered, dropping push");
            return Dispatch::Dropped;
        }

        if state.once {
            // Claim the single delivery by removing the route first.
            if !self.remove_if_same(&id, &state) {
                return Dispatch::Dropped;
            }
            state.deliver(result);
            state.mark_closed();
            return Dispatch::DeliveredAndClosed;
        }

        if state.deliver(result) {
            Dispatch::Delivered
        } else {
            Dispatch::Dropped
        }
    }

    /// Returns `true` if `id` has a route.
    pub fn contains(&self, id: &SubscriptionId) -> bool {
        lock(&self.entries).contains_key(id)
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to one open subscription.
///
/// Dropping the handle closes the subscription.
pub struct Subscription {
    state: Arc<SubscriptionState>,
    shared: Arc<Shared>,
}

impl Subscription {
    pub(crate) fn new(state: Arc<SubscriptionState>, shared: Arc<Shared>) -> Self {
        Self { state, shared }
    }

    /// Register the delivery callback, replacing any previous one.
    ///
    /// Pushes routed while no callback is registered are dropped. To catch
    /// pushes sent right behind the acknowledgement, pass the first callback
    /// with [`SubscribeOptions::on_push`] instead.
    pub fn next(&self, callback: impl FnMut(PushResult) + Send + 'static) {
        self.state.set_callback(Box::new(callback));
    }

    /// Like [`next`](Self::next), decoding push data into `T` first.
    pub fn next_typed<T, F>(&self, mut callback: F)
    where
        T: DeserializeOwned,
        F: FnMut(CallResult<T>) + Send + 'static,
    {
        self.next(move |push| callback(push.decode::<T>()));
    }

    /// Forward deliveries into a channel instead of a callback.
    pub fn receiver(&self) -> mpsc::UnboundedReceiver<PushResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next(move |push| {
            let _ = tx.send(push);
        });
        rx
    }

    /// The server-assigned id, or `None` while the acknowledgement is pending.
    pub fn subscription_id(&self) -> Option<&SubscriptionId> {
        self.state.id()
    }

    /// The subscribe request as sent.
    pub fn request(&self) -> &JsonRpcRequest {
        &self.state.request
    }

    /// Trace context of the subscribe request.
    pub fn context(&self) -> &TraceContext {
        self.state.context()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Stop deliveries and deregister. Idempotent.
    ///
    /// Once this returns no new delivery will start. The shared connection is
    /// released if nothing else uses it.
    pub fn close(&self) {
        if !self.state.mark_closed() {
            return;
        }
        if let Some(id) = self.state.id() {
            self.shared.routes.remove_if_same(id, &self.state);
            tracing::debug!(subscription = %id, "subscription closed");
        }
        self.shared.release_if_idle();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.state.id())
            .field("method", &self.state.request.method)
            .field("open", &self.state.is_open())
            .finish()
    }
}
