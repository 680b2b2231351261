use serde_json::json;

use noderpc_core::result::{CallFailure, CallOptions, CallResult};
use noderpc_ws::Subscription;

use crate::client::NodeClient;
use crate::params::{check_address, check_hash, BlockSubscription, LogSubscription};
use crate::types::{Account, Block, Transaction};

/// Chain queries and head/log subscriptions.
#[derive(Debug, Clone, Copy)]
pub struct BlockchainMethods<'a> {
    client: &'a NodeClient,
}

impl<'a> BlockchainMethods<'a> {
    pub(crate) fn new(client: &'a NodeClient) -> Self {
        Self { client }
    }

    pub async fn get_block_number(&self, options: CallOptions) -> CallResult<u32> {
        self.client.request("getBlockNumber", vec![], options).await
    }

    pub async fn get_batch_number(&self, options: CallOptions) -> CallResult<u32> {
        self.client.request("getBatchNumber", vec![], options).await
    }

    pub async fn get_epoch_number(&self, options: CallOptions) -> CallResult<u32> {
        self.client.request("getEpochNumber", vec![], options).await
    }

    pub async fn get_block_by_hash(
        &self,
        hash: &str,
        include_body: bool,
        options: CallOptions,
    ) -> CallResult<Block> {
        self.client
            .checked_request(
                "getBlockByHash",
                check_hash("hash", hash),
                || vec![json!(hash), json!(include_body)],
                options,
            )
            .await
    }

    pub async fn get_block_by_number(
        &self,
        number: u32,
        include_body: bool,
        options: CallOptions,
    ) -> CallResult<Block> {
        self.client
            .request("getBlockByNumber", vec![json!(number), json!(include_body)], options)
            .await
    }

    pub async fn get_latest_block(&self, include_body: bool, options: CallOptions) -> CallResult<Block> {
        self.client
            .request("getLatestBlock", vec![json!(include_body)], options)
            .await
    }

    pub async fn get_account_by_address(&self, address: &str, options: CallOptions) -> CallResult<Account> {
        self.client
            .checked_request(
                "getAccountByAddress",
                check_address("address", address),
                || vec![json!(address)],
                options,
            )
            .await
    }

    pub async fn get_transaction_by_hash(&self, hash: &str, options: CallOptions) -> CallResult<Transaction> {
        self.client
            .checked_request(
                "getTransactionByHash",
                check_hash("hash", hash),
                || vec![json!(hash)],
                options,
            )
            .await
    }

    /// Stream new head blocks.
    ///
    /// Pushes carry a [`Block`] for `FULL`/`PARTIAL` retrieval and a hash
    /// string for `HASH`.
    pub async fn subscribe_for_blocks(&self, params: BlockSubscription) -> Result<Subscription, CallFailure> {
        let method = params.method();
        params.validate().map_err(|e| self.client.rejected(method, e))?;
        let options = params.apply(self.client.subscribe_options());
        self.client
            .open_subscription(method, params.params(), options)
            .await
    }

    /// Stream transaction logs for addresses and log types.
    pub async fn subscribe_for_logs(&self, params: LogSubscription) -> Result<Subscription, CallFailure> {
        let method = "subscribeForLogsByAddressesAndTypes";
        params.validate().map_err(|e| self.client.rejected(method, e))?;
        let options = params.apply(self.client.subscribe_options());
        self.client
            .open_subscription(method, params.params(), options)
            .await
    }
}
