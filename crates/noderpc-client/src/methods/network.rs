use noderpc_core::result::{CallOptions, CallResult};

use crate::client::NodeClient;

#[derive(Debug, Clone, Copy)]
pub struct NetworkMethods<'a> {
    client: &'a NodeClient,
}

impl<'a> NetworkMethods<'a> {
    pub(crate) fn new(client: &'a NodeClient) -> Self {
        Self { client }
    }

    pub async fn get_peer_id(&self, options: CallOptions) -> CallResult<String> {
        self.client.request("getPeerId", vec![], options).await
    }

    pub async fn get_peer_count(&self, options: CallOptions) -> CallResult<u32> {
        self.client.request("getPeerCount", vec![], options).await
    }

    pub async fn get_peer_list(&self, options: CallOptions) -> CallResult<Vec<String>> {
        self.client.request("getPeerList", vec![], options).await
    }
}
