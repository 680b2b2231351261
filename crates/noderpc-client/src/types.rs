//! Typed shapes of node results.
//!
//! Only the commonly used fields are named; anything else the node sends is
//! kept in the `extra` map of each type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Chain state ──────────────────────────────────────────────────────────────

/// Chain head a result was computed against, returned as call metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainState {
    pub block_number: u32,
    pub block_hash: String,
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Micro,
    Macro,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    pub number: u32,
    #[serde(default)]
    pub batch: u32,
    #[serde(default)]
    pub epoch: u32,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub parent_hash: Option<String>,
    /// Present only when the body was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Transaction>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Block {
    pub fn is_macro(&self) -> bool {
        self.block_type == BlockType::Macro
    }
}

// ─── Accounts & transactions ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: String,
    /// Balance in the smallest unit.
    pub balance: u64,
    #[serde(rename = "type")]
    pub account_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: u64,
    pub fee: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u32>,
    #[serde(default)]
    pub validity_start_height: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ─── Mempool ──────────────────────────────────────────────────────────────────

/// Mempool occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolInfo {
    pub total: u32,
    #[serde(default)]
    pub buckets: Vec<u32>,
    /// Transaction count keyed by fee-per-byte bucket.
    #[serde(flatten)]
    pub by_fee: BTreeMap<String, u32>,
}

/// A mempool entry: a hash, or the full transaction when requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MempoolEntry {
    Hash(String),
    Transaction(Box<Transaction>),
}

// ─── Policy ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConstants {
    pub staking_contract_address: String,
    pub coinbase_address: String,
    pub transaction_validity_window: u32,
    pub max_size_micro_body: u64,
    pub version: u16,
    pub slots: u16,
    pub blocks_per_batch: u32,
    pub batches_per_epoch: u32,
    pub blocks_per_epoch: u32,
    pub validator_deposit: u64,
    pub total_supply: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
