//! Per-method parameter structs, validated before an envelope is built.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use noderpc_core::error::TransportError;
use noderpc_ws::SubscribeOptions;

use crate::types::BlockType;

/// A parameter that cannot be sent to the node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("{field}: expected a 64-character hex hash, got {value:?}")]
    InvalidHash { field: &'static str, value: String },

    #[error("{field}: {value:?} is not a valid account address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: expected a non-empty, even-length hex string")]
    InvalidHex { field: &'static str },

    #[error("{0}")]
    Unsupported(&'static str),
}

impl From<ParamError> for TransportError {
    fn from(err: ParamError) -> Self {
        TransportError::InvalidRequest(err.to_string())
    }
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

pub(crate) fn check_hash(field: &'static str, value: &str) -> Result<(), ParamError> {
    if value.len() == 64 && is_hex(value) {
        Ok(())
    } else {
        Err(ParamError::InvalidHash {
            field,
            value: value.to_string(),
        })
    }
}

pub(crate) fn check_hex(field: &'static str, value: &str) -> Result<(), ParamError> {
    if !value.is_empty() && value.len() % 2 == 0 && is_hex(value) {
        Ok(())
    } else {
        Err(ParamError::InvalidHex { field })
    }
}

/// Account addresses in user-friendly form: `NQ` + two check digits + 32
/// base32 characters, spaces between groups optional.
pub(crate) fn check_address(field: &'static str, value: &str) -> Result<(), ParamError> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let valid = compact.is_ascii()
        && compact.len() == 36
        && compact[..2].eq_ignore_ascii_case("NQ")
        && compact[2..4].bytes().all(|b| b.is_ascii_digit())
        && compact[4..].bytes().all(|b| b.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ParamError::InvalidAddress {
            field,
            value: value.to_string(),
        })
    }
}

// ─── Block subscription ───────────────────────────────────────────────────────

/// How much of each new head block to stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RetrieveBlock {
    /// Header and body.
    Full,
    /// Header only.
    #[default]
    Partial,
    /// Block hash only.
    Hash,
}

#[derive(Debug, Clone, Default)]
pub struct BlockSubscription {
    pub retrieve: RetrieveBlock,
    /// Only deliver blocks of this type.
    pub block_type: Option<BlockType>,
    pub once: bool,
}

impl BlockSubscription {
    pub fn new(retrieve: RetrieveBlock) -> Self {
        Self {
            retrieve,
            ..Default::default()
        }
    }

    pub fn only(mut self, block_type: BlockType) -> Self {
        self.block_type = Some(block_type);
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if self.block_type.is_some() && self.retrieve == RetrieveBlock::Hash {
            return Err(ParamError::Unsupported(
                "block type filtering needs FULL or PARTIAL retrieval",
            ));
        }
        Ok(())
    }

    pub(crate) fn method(&self) -> &'static str {
        match self.retrieve {
            RetrieveBlock::Full | RetrieveBlock::Partial => "subscribeForHeadBlock",
            RetrieveBlock::Hash => "subscribeForHeadBlockHash",
        }
    }

    pub(crate) fn params(&self) -> Vec<Value> {
        match self.retrieve {
            RetrieveBlock::Full => vec![json!(true)],
            RetrieveBlock::Partial => vec![json!(false)],
            RetrieveBlock::Hash => vec![],
        }
    }

    pub(crate) fn apply(&self, mut options: SubscribeOptions) -> SubscribeOptions {
        if self.once {
            options = options.once();
        }
        if let Some(wanted) = self.block_type {
            options = options.filter(move |block| {
                serde_json::from_value::<BlockType>(block["type"].clone()).ok() == Some(wanted)
            });
        }
        options
    }
}

// ─── Log subscription ─────────────────────────────────────────────────────────

/// Kinds of transaction logs the node can stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogType {
    PayFee,
    Transfer,
    HtlcCreate,
    HtlcTimeoutResolve,
    HtlcRegularTransfer,
    HtlcEarlyResolve,
    VestingCreate,
    CreateValidator,
    UpdateValidator,
    DeactivateValidator,
    ReactivateValidator,
    RetireValidator,
    DeleteValidator,
    CreateStaker,
    Stake,
    UpdateStaker,
    RemoveStake,
    DeleteStaker,
    PayoutReward,
    Park,
    Slash,
    RevertContract,
    FailedTransaction,
}

/// Stream logs touching `addresses`, limited to `log_types`.
///
/// Empty lists mean "any".
#[derive(Debug, Clone, Default)]
pub struct LogSubscription {
    pub addresses: Vec<String>,
    pub log_types: Vec<LogType>,
    pub once: bool,
}

impl LogSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    pub fn log_type(mut self, log_type: LogType) -> Self {
        if !self.log_types.contains(&log_type) {
            self.log_types.push(log_type);
        }
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        self.addresses
            .iter()
            .try_for_each(|address| check_address("addresses", address))
    }

    pub(crate) fn params(&self) -> Vec<Value> {
        vec![json!(self.addresses), json!(self.log_types)]
    }

    pub(crate) fn apply(&self, options: SubscribeOptions) -> SubscribeOptions {
        if self.once {
            options.once()
        } else {
            options
        }
    }
}
