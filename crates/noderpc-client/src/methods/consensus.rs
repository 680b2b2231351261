use serde_json::json;

use noderpc_core::result::{CallOptions, CallResult};

use crate::client::NodeClient;
use crate::params::check_hex;

#[derive(Debug, Clone, Copy)]
pub struct ConsensusMethods<'a> {
    client: &'a NodeClient,
}

impl<'a> ConsensusMethods<'a> {
    pub(crate) fn new(client: &'a NodeClient) -> Self {
        Self { client }
    }

    pub async fn is_consensus_established(&self, options: CallOptions) -> CallResult<bool> {
        self.client
            .request("isConsensusEstablished", vec![], options)
            .await
    }

    /// Broadcast a signed, hex-encoded transaction. Returns its hash.
    pub async fn send_raw_transaction(&self, raw_tx: &str, options: CallOptions) -> CallResult<String> {
        self.client
            .checked_request(
                "sendRawTransaction",
                check_hex("raw_tx", raw_tx),
                || vec![json!(raw_tx)],
                options,
            )
            .await
    }
}
