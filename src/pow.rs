//! Proof-of-work search
//!
//! The block digest is SHA-256 over every field except `hash`, rendered as
//! lowercase hex. A digest satisfies difficulty `d` when its first `d` hex
//! characters are `'0'`. The search starts at nonce 0 and walks upwards with
//! no bound; it is stopped only by success or by its cancellation token.

use crate::error::{Error, Result};
use crate::types::{Block, BlockTemplate, Nonce};
use sha2::{Digest, Sha256};
use std::time::Instant;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Hex characters in a SHA-256 digest; no difficulty above this is satisfiable
pub const MAX_DIFFICULTY: u32 = 64;

/// Nonces tried between cancellation checks
const CHECK_INTERVAL: u64 = 10_000;

/// Outcome of a successful search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub nonce: Nonce,
    pub hash: String,
    pub hashes_tried: u64,
}

/// Hasher state with every template field absorbed, ready for a nonce
#[derive(Clone)]
struct TemplateHasher {
    prefix: Sha256,
}

impl TemplateHasher {
    fn new(template: &BlockTemplate) -> Self {
        let mut prefix = Sha256::new();
        absorb_str(&mut prefix, &template.previous_hash);
        absorb_str(&mut prefix, template.previous_storage_address.as_str());
        prefix.update((template.transactions.len() as u64).to_le_bytes());
        for tx in &template.transactions {
            absorb_str(&mut prefix, &tx.origin_id);
            absorb_str(&mut prefix, &tx.payload);
        }
        prefix.update(template.block_number.to_le_bytes());
        prefix.update(template.timestamp.to_le_bytes());
        absorb_str(&mut prefix, &template.creator);
        prefix.update(template.difficulty.to_le_bytes());
        Self { prefix }
    }

    fn hash(&self, nonce: Nonce) -> [u8; 32] {
        let mut hasher = self.prefix.clone();
        hasher.update(nonce.to_le_bytes());
        hasher.finalize().into()
    }
}

// Length prefix keeps adjacent fields from sliding into each other.
fn absorb_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Number of leading zero nibbles in a raw digest
fn leading_zero_nibbles(hash: &[u8; 32]) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 2;
            continue;
        }
        if byte >> 4 == 0 {
            count += 1;
        }
        break;
    }
    count
}

/// Hex digest of `template` sealed with `nonce`
pub fn digest(template: &BlockTemplate, nonce: Nonce) -> String {
    hex::encode(TemplateHasher::new(template).hash(nonce))
}

/// Whether `digest` starts with at least `difficulty` `'0'` characters
pub fn has_leading_zero_prefix(digest: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    digest.len() >= difficulty && digest.bytes().take(difficulty).all(|b| b == b'0')
}

/// Recompute a block's digest and check it against its difficulty
pub fn verify(block: &Block) -> bool {
    let expected = digest(&block.template(), block.nonce);
    expected == block.hash && has_leading_zero_prefix(&block.hash, block.difficulty)
}

/// Nonce search over block templates
#[derive(Debug, Clone)]
pub struct ProofOfWorkEngine {
    check_interval: u64,
}

impl Default for ProofOfWorkEngine {
    fn default() -> Self {
        Self {
            check_interval: CHECK_INTERVAL,
        }
    }
}

impl ProofOfWorkEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search on the current thread.
    ///
    /// Returns the first nonce from 0 whose digest meets the template's
    /// difficulty, or `Cancelled` once `cancel` fires.
    pub fn mine_blocking(
        &self,
        template: &BlockTemplate,
        cancel: &CancellationToken,
    ) -> Result<Solution> {
        if template.difficulty > MAX_DIFFICULTY {
            return Err(Error::input_validation(format!(
                "difficulty {} exceeds digest length {}",
                template.difficulty, MAX_DIFFICULTY
            )));
        }

        let hasher = TemplateHasher::new(template);
        let started = Instant::now();
        let mut nonce = Nonce::new(0);
        let mut tried = 0u64;

        loop {
            if cancel.is_cancelled() {
                debug!(
                    block_number = template.block_number,
                    hashes_tried = tried,
                    "Proof-of-work search cancelled"
                );
                return Err(Error::cancelled("proof-of-work search"));
            }

            for _ in 0..self.check_interval {
                let hash = hasher.hash(nonce);
                tried += 1;
                if leading_zero_nibbles(&hash) >= template.difficulty {
                    let elapsed = started.elapsed();
                    info!(
                        block_number = template.block_number,
                        difficulty = template.difficulty,
                        nonce = nonce.value(),
                        hashes_tried = tried,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Found proof-of-work solution"
                    );
                    return Ok(Solution {
                        nonce,
                        hash: hex::encode(hash),
                        hashes_tried: tried,
                    });
                }
                nonce.increment();
            }
        }
    }

    /// Search on the blocking pool so no async worker or lock is held
    pub async fn mine(&self, template: BlockTemplate, cancel: CancellationToken) -> Result<Solution> {
        let engine = self.clone();
        task::spawn_blocking(move || engine.mine_blocking(&template, &cancel))
            .await
            .map_err(|e| Error::cancelled(format!("proof-of-work task: {}", e)))?
    }
}
