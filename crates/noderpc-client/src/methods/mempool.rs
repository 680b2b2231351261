use serde_json::json;

use noderpc_core::result::{CallOptions, CallResult};

use crate::client::NodeClient;
use crate::params::check_hex;
use crate::types::{MempoolEntry, MempoolInfo};

#[derive(Debug, Clone, Copy)]
pub struct MempoolMethods<'a> {
    client: &'a NodeClient,
}

impl<'a> MempoolMethods<'a> {
    pub(crate) fn new(client: &'a NodeClient) -> Self {
        Self { client }
    }

    pub async fn mempool_info(&self, options: CallOptions) -> CallResult<MempoolInfo> {
        self.client.request("mempool", vec![], options).await
    }

    /// Hashes of pending transactions, or the transactions themselves when
    /// `include_transactions` is set.
    pub async fn get_transactions_from_mempool(
        &self,
        include_transactions: bool,
        options: CallOptions,
    ) -> CallResult<Vec<MempoolEntry>> {
        self.client
            .request("mempoolContent", vec![json!(include_transactions)], options)
            .await
    }

    /// Add a hex-encoded transaction to the node's mempool. Returns its hash.
    pub async fn push_transaction(
        &self,
        raw_tx: &str,
        high_priority: bool,
        options: CallOptions,
    ) -> CallResult<String> {
        let method = if high_priority {
            "pushHighPriorityTransaction"
        } else {
            "pushTransaction"
        };
        self.client
            .checked_request(method, check_hex("raw_tx", raw_tx), || vec![json!(raw_tx)], options)
            .await
    }
}
