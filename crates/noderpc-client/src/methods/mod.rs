//! Method groups, one per area of the node API.
//!
//! Each group borrows the [`NodeClient`](crate::NodeClient) and maps typed
//! arguments onto a method name and positional params.

mod blockchain;
mod consensus;
mod mempool;
mod network;
mod policy;

pub use blockchain::BlockchainMethods;
pub use consensus::ConsensusMethods;
pub use mempool::MempoolMethods;
pub use network::NetworkMethods;
pub use policy::PolicyMethods;
