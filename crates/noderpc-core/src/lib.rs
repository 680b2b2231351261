//! noderpc-core — envelope, result and transport types shared by noderpc.
//!
//! # Overview
//!
//! noderpc exposes a remote node's JSON-RPC and subscription API through two
//! channels: a request/response *call channel* and a streaming *subscription
//! channel*. This crate holds what both of them share:
//!
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] / [`JsonRpcNotification`] — wire types
//! - [`RequestIdCounter`] — per-channel correlation id allocator
//! - [`CallResult`] / [`TraceContext`] — the uniform result envelope
//! - [`TransportError`] — structured error type with stable error codes
//! - [`HttpSender`] / [`StreamTransport`] — the transport boundary traits

pub mod error;
pub mod request;
pub mod result;
pub mod transport;

pub use error::{codes, TransportError};
pub use request::{
    Inbound, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PushParams,
    RequestIdCounter, RpcId, RpcParam, SubscriptionId,
};
pub use result::{
    split_result, CallFailure, CallOptions, CallResult, CallSuccess, TraceContext, DEFAULT_TIMEOUT,
};
pub use transport::{
    Headers, HttpResponse, HttpSender, StreamConnection, StreamEvent, StreamSender,
    StreamTransport,
};
