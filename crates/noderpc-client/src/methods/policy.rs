use noderpc_core::result::{CallOptions, CallResult};

use crate::client::NodeClient;
use crate::types::PolicyConstants;

#[derive(Debug, Clone, Copy)]
pub struct PolicyMethods<'a> {
    client: &'a NodeClient,
}

impl<'a> PolicyMethods<'a> {
    pub(crate) fn new(client: &'a NodeClient) -> Self {
        Self { client }
    }

    pub async fn get_policy_constants(&self, options: CallOptions) -> CallResult<PolicyConstants> {
        self.client
            .request("getPolicyConstants", vec![], options)
            .await
    }
}
