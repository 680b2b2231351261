//! noderpc-http — request/response call channel.
//!
//! # Features
//! - One POST per call, correlated by a per-channel request id
//! - Optional per-call timeout with a distinguished failure code
//! - Every outcome normalized into a [`CallResult`](noderpc_core::CallResult)
//! - No internal retry; retry policy belongs to the caller

pub mod client;
pub mod sender;

pub use client::{CallChannel, CallChannelConfig};
pub use sender::ReqwestSender;
