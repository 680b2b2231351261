//! noderpc-ws — subscription channel over a persistent streaming connection.
//!
//! # Features
//! - One shared connection per channel, opened lazily and released when the
//!   last subscription closes
//! - Routing of pushes by server-assigned subscription id
//! - Per-subscription filter predicate and one-shot (`once`) auto-close
//! - Terminal failure delivery to every open subscription when the
//!   connection drops
//! - Request multiplexing over the same connection

pub mod channel;
pub mod stream;
pub mod subscriptions;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use channel::{SubscriptionChannel, SubscriptionChannelConfig};
pub use stream::TungsteniteTransport;
pub use subscriptions::{
    Dispatch, PushResult, SubscribeOptions, Subscription, SubscriptionManager,
};
