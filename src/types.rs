//! Core types for the compute chain
//!
//! Transactions carry the textual result of an outsourced computation, blocks
//! group a fixed-size batch of them and link to their predecessor both by hash
//! and by storage address.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel used for the hash and storage address of the (virtual) genesis tip
pub const GENESIS_SENTINEL: &str = "-1";

/// Result of one outsourced computation, awaiting inclusion in a block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Identifier of the submitting peer (its network address)
    pub origin_id: String,
    /// Textual output of the computation
    pub payload: String,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(origin_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            origin_id: origin_id.into(),
            payload: payload.into(),
        }
    }
}

/// Proof-of-work nonce
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Create a new nonce
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the nonce value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Convert to bytes (little-endian)
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Increment nonce
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque content-derived identifier returned by the storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageAddress(pub String);

impl StorageAddress {
    /// Create a new storage address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Address recorded for the genesis tip
    pub fn genesis() -> Self {
        Self(GENESIS_SENTINEL.to_string())
    }

    /// Get the address as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored artifact named by its address plus a file-type suffix (e.g. `.py`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    /// Storage address of the artifact
    pub address: StorageAddress,
    /// File-type suffix including the leading dot
    pub suffix: String,
}

impl ContentRef {
    /// Create a new content reference
    pub fn new(address: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            address: StorageAddress::new(address),
            suffix: suffix.into(),
        }
    }

    /// File name used when the artifact is materialised on disk
    pub fn file_name(&self) -> String {
        format!("{}{}", self.address, self.suffix)
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.address, self.suffix)
    }
}

/// Last committed block as seen by the chain state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tip {
    /// Hash of the last committed block
    pub hash: String,
    /// Storage address of the last committed block
    pub storage_address: StorageAddress,
    /// Number of the last committed block (0 before any block)
    pub block_number: u64,
}

impl Tip {
    /// Sentinel tip every node starts from
    pub fn genesis() -> Self {
        Self {
            hash: GENESIS_SENTINEL.to_string(),
            storage_address: StorageAddress::genesis(),
            block_number: 0,
        }
    }

    /// Number the next block attached to this tip must carry
    pub fn next_block_number(&self) -> u64 {
        self.block_number + 1
    }
}

impl Default for Tip {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Block fields fixed at assembly time, before the nonce search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTemplate {
    /// Hash of the predecessor
    pub previous_hash: String,
    /// Storage address of the predecessor
    pub previous_storage_address: StorageAddress,
    /// Transactions in FIFO order
    pub transactions: Vec<Transaction>,
    /// Block height
    pub block_number: u64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Identifier of the mining node
    pub creator: String,
    /// Required count of leading '0' hex characters
    pub difficulty: u32,
}

impl BlockTemplate {
    /// Assemble a template attached to `tip`
    pub fn new(
        tip: &Tip,
        transactions: Vec<Transaction>,
        timestamp: i64,
        creator: impl Into<String>,
        difficulty: u32,
    ) -> Self {
        Self {
            previous_hash: tip.hash.clone(),
            previous_storage_address: tip.storage_address.clone(),
            transactions,
            block_number: tip.next_block_number(),
            timestamp,
            creator: creator.into(),
            difficulty,
        }
    }

    /// Finish the block with the nonce and digest found by the search
    pub fn seal(self, nonce: Nonce, hash: String) -> Block {
        Block {
            previous_hash: self.previous_hash,
            previous_storage_address: self.previous_storage_address,
            transactions: self.transactions,
            nonce,
            hash,
            block_number: self.block_number,
            timestamp: self.timestamp,
            creator: self.creator,
            difficulty: self.difficulty,
        }
    }
}

/// A mined block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Hash of the predecessor
    pub previous_hash: String,
    /// Storage address of the predecessor
    pub previous_storage_address: StorageAddress,
    /// Transactions in FIFO order
    pub transactions: Vec<Transaction>,
    /// Winning nonce
    pub nonce: Nonce,
    /// Proof-of-work digest (hex)
    pub hash: String,
    /// Block height
    pub block_number: u64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Identifier of the mining node
    pub creator: String,
    /// Required count of leading '0' hex characters
    pub difficulty: u32,
}

impl Block {
    /// Template this block was sealed from
    pub fn template(&self) -> BlockTemplate {
        BlockTemplate {
            previous_hash: self.previous_hash.clone(),
            previous_storage_address: self.previous_storage_address.clone(),
            transactions: self.transactions.clone(),
            block_number: self.block_number,
            timestamp: self.timestamp,
            creator: self.creator.clone(),
            difficulty: self.difficulty,
        }
    }

    /// Encode for publication to content-addressed storage
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Abbreviated hash for log lines
    pub fn short_hash(&self) -> &str {
        let end = self.hash.len().min(12);
        &self.hash[..end]
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block #{} {} (prev {}, {} txs)",
            self.block_number,
            self.short_hash(),
            self.previous_hash,
            self.transactions.len()
        )
    }
}
