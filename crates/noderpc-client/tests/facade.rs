//! NodeClient against in-process transports.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use noderpc_client::{
    Auth, BlockSubscription, BlockType, BlockchainState, ClientConfig, LogSubscription, LogType,
    MempoolEntry, NodeClient, RetrieveBlock,
};
use noderpc_core::codes;
use noderpc_core::error::TransportError;
use noderpc_core::transport::{Headers, HttpResponse, HttpSender};
use noderpc_ws::testing::MockStreamTransport;

const ADDRESS: &str = "NQ07 0000 0000 0000 0000 0000 0000 0000 0000";

/// Answers every call with a canned result and records what was sent.
#[derive(Default)]
struct ScriptedNode {
    results: Mutex<Vec<(String, Value)>>,
    seen: Mutex<Vec<(Headers, Value)>>,
}

impl ScriptedNode {
    fn answer(self: &Arc<Self>, method: &str, result: Value) -> Arc<Self> {
        self.results.lock().unwrap().push((method.to_string(), result));
        self.clone()
    }

    fn requests(&self) -> Vec<Value> {
        self.seen.lock().unwrap().iter().map(|(_, body)| body.clone()).collect()
    }
}

#[async_trait]
impl HttpSender for ScriptedNode {
    async fn post(&self, _url: &str, headers: &Headers, body: String) -> Result<HttpResponse, TransportError> {
        let req: Value = serde_json::from_str(&body)?;
        self.seen.lock().unwrap().push((headers.clone(), req.clone()));
        let result = self
            .results
            .lock()
            .unwrap()
            .iter()
            .find(|(method, _)| req["method"] == method.as_str())
            .map(|(_, result)| result.clone());
        let reply = match result {
            Some(result) => json!({ "jsonrpc": "2.0", "id": req["id"], "result": result }),
            None => json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": -32601, "message": "Method not found" }
            }),
        };
        Ok(HttpResponse {
            status: 200,
            body: reply.to_string(),
        })
    }
}

fn client(config: ClientConfig, node: &Arc<ScriptedNode>, stream: &MockStreamTransport) -> NodeClient {
    NodeClient::with_transports(config, node.clone(), Arc::new(stream.clone())).unwrap()
}

fn config() -> ClientConfig {
    ClientConfig::new("http://127.0.0.1:8648")
}

#[tokio::test]
async fn block_number_with_metadata() {
    let node = Arc::new(ScriptedNode::default()).answer(
        "getBlockNumber",
        json!({ "data": 1234, "metadata": { "blockNumber": 1234, "blockHash": "aa" } }),
    );
    let client = client(config().with_metadata(true), &node, &MockStreamTransport::new());

    let result = client.blockchain().get_block_number(client.options()).await;
    let success = result.into_result().unwrap();
    assert_eq!(success.data, 1234);
    let state: BlockchainState = success.metadata_as().unwrap();
    assert_eq!(state.block_hash, "aa");
}

#[tokio::test]
async fn metadata_is_dropped_unless_configured() {
    let node = Arc::new(ScriptedNode::default()).answer(
        "getPeerCount",
        json!({ "data": 8, "metadata": { "blockNumber": 1, "blockHash": "aa" } }),
    );
    let client = client(config(), &node, &MockStreamTransport::new());

    let result = client.network().get_peer_count(client.options()).await;
    assert_eq!(result.data(), Some(&8));
    assert!(result.metadata().is_none());
}

#[tokio::test]
async fn auth_header_reaches_the_node() {
    let node = Arc::new(ScriptedNode::default()).answer("getPeerId", json!({ "data": "12D3Koo" }));
    let client = client(config().with_auth(Auth::bearer("s3cret")), &node, &MockStreamTransport::new());

    let result = client.network().get_peer_id(client.options()).await;
    assert_eq!(result.context().headers["Authorization"], "Bearer s3cret");
    let (headers, _) = node.seen.lock().unwrap()[0].clone();
    assert_eq!(headers["Authorization"], "Bearer s3cret");
}

#[tokio::test]
async fn block_by_number_sends_positional_params() {
    let node = Arc::new(ScriptedNode::default()).answer(
        "getBlockByNumber",
        json!({ "data": { "hash": "bb", "number": 7, "timestamp": 1, "type": "micro" } }),
    );
    let client = client(config(), &node, &MockStreamTransport::new());

    let block = client
        .blockchain()
        .get_block_by_number(7, false, client.options())
        .await
        .into_data()
        .unwrap();
    assert_eq!(block.number, 7);
    assert_eq!(block.block_type, BlockType::Micro);
    assert_eq!(node.requests()[0]["params"], json!([7, false]));
}

#[tokio::test]
async fn invalid_params_fail_without_a_request() {
    let node = Arc::new(ScriptedNode::default());
    let client = client(config(), &node, &MockStreamTransport::new());

    let by_hash = client.blockchain().get_block_by_hash("abc", true, client.options()).await;
    assert_eq!(by_hash.error().unwrap().code, codes::INVALID_REQUEST);

    let account = client
        .blockchain()
        .get_account_by_address("not an address", client.options())
        .await;
    assert_eq!(account.error().unwrap().code, codes::INVALID_REQUEST);

    let pushed = client.mempool().push_transaction("0x12", false, client.options()).await;
    assert_eq!(pushed.error().unwrap().code, codes::INVALID_REQUEST);

    assert!(node.requests().is_empty());
}

#[tokio::test]
async fn server_errors_pass_through() {
    let node = Arc::new(ScriptedNode::default());
    let client = client(config(), &node, &MockStreamTransport::new());

    let result = client.policy().get_policy_constants(client.options()).await;
    let failure = result.error().unwrap();
    assert_eq!(failure.code, -32601);
    assert_eq!(failure.message, "Method not found");
}

#[tokio::test]
async fn high_priority_push_uses_its_own_method() {
    let node = Arc::new(ScriptedNode::default())
        .answer("pushHighPriorityTransaction", json!({ "data": "ff".repeat(32) }));
    let client = client(config(), &node, &MockStreamTransport::new());

    let hash = client
        .mempool()
        .push_transaction("00ff", true, client.options())
        .await
        .into_data()
        .unwrap();
    assert_eq!(hash.len(), 64);
    assert_eq!(node.requests()[0]["params"], json!(["00ff"]));
}

#[tokio::test]
async fn mempool_content_decodes_hashes() {
    let node = Arc::new(ScriptedNode::default()).answer("mempoolContent", json!({ "data": ["aa", "bb"] }));
    let client = client(config(), &node, &MockStreamTransport::new());

    let entries = client
        .mempool()
        .get_transactions_from_mempool(false, client.options())
        .await
        .into_data()
        .unwrap();
    assert_eq!(entries, vec![MempoolEntry::Hash("aa".into()), MempoolEntry::Hash("bb".into())]);
}

#[tokio::test]
async fn head_block_subscription_filters_by_type() {
    let node = Arc::new(ScriptedNode::default());
    let stream = MockStreamTransport::new();
    let client = client(config().with_auth(Auth::basic("u", "p")), &node, &stream);

    let task = {
        let blockchain = client.blockchain();
        let params = BlockSubscription::new(RetrieveBlock::Partial).only(BlockType::Macro).once();
        async move { blockchain.subscribe_for_blocks(params).await }
    };
    let ack = async {
        let sent = stream.wait_for_sent(1).await;
        assert_eq!(sent[0]["method"], "subscribeForHeadBlock");
        assert_eq!(sent[0]["params"], json!([false]));
        stream.inject(json!({ "jsonrpc": "2.0", "id": sent[0]["id"], "result": 5 }));
    };
    let (sub, ()) = tokio::join!(task, ack);
    let sub = sub.unwrap();
    assert!(stream.handshake_headers()[0]["Authorization"].starts_with("Basic "));

    let mut rx = sub.receiver();
    for (number, kind) in [(1, "micro"), (2, "macro"), (3, "macro")] {
        stream.inject(json!({
            "jsonrpc": "2.0",
            "method": "subscribeForHeadBlock",
            "params": {
                "subscription": 5,
                "result": { "data": { "hash": "h", "number": number, "timestamp": 0, "type": kind } }
            }
        }));
    }

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    let block = first.decode::<noderpc_client::Block>().into_data().unwrap();
    assert_eq!(block.number, 2);
    assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn log_subscription_validates_before_connecting() {
    let node = Arc::new(ScriptedNode::default());
    let stream = MockStreamTransport::new();
    let client = client(config(), &node, &stream);

    let failure = client
        .blockchain()
        .subscribe_for_logs(LogSubscription::new().address("NQ00 bad"))
        .await
        .unwrap_err();
    assert_eq!(failure.code, codes::INVALID_REQUEST);
    assert_eq!(stream.opens(), 0);
}

#[tokio::test]
async fn log_subscription_sends_addresses_and_types() {
    let node = Arc::new(ScriptedNode::default());
    let stream = MockStreamTransport::new();
    let client = client(config(), &node, &stream);

    let blockchain = client.blockchain();
    let task = blockchain.subscribe_for_logs(LogSubscription::new().address(ADDRESS).log_type(LogType::Transfer));
    let ack = async {
        let sent = stream.wait_for_sent(1).await;
        assert_eq!(sent[0]["method"], "subscribeForLogsByAddressesAndTypes");
        assert_eq!(sent[0]["params"], json!([[ADDRESS], ["transfer"]]));
        stream.inject(json!({ "jsonrpc": "2.0", "id": sent[0]["id"], "result": "sub-1" }));
    };
    let (sub, ()) = tokio::join!(task, ack);
    assert_eq!(sub.unwrap().subscription_id().unwrap().to_string(), "sub-1");
}
