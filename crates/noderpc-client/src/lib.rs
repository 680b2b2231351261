//! noderpc-client — typed facade over a node's JSON-RPC and subscription API.
//!
//! [`NodeClient`] owns one call channel and one subscription channel and
//! exposes the node's methods in groups:
//!
//! ```rust,no_run
//! use noderpc_client::{ClientConfig, NodeClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = NodeClient::new(ClientConfig::new("http://127.0.0.1:8648"))?;
//! let height = client.blockchain().get_block_number(client.options()).await.into_data()?;
//! println!("head is at {height}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod methods;
pub mod params;
pub mod types;

pub use auth::Auth;
pub use client::NodeClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use params::{BlockSubscription, LogSubscription, LogType, ParamError, RetrieveBlock};
pub use types::{
    Account, Block, BlockType, BlockchainState, MempoolEntry, MempoolInfo, PolicyConstants,
    Transaction,
};

pub use noderpc_core::{CallFailure, CallOptions, CallResult, TraceContext};
pub use noderpc_ws::{PushResult, SubscribeOptions, Subscription};
