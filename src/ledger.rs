//! Shared pool and chain state
//!
//! [`Ledger`] is the node's single exclusion domain. The request boundary adds
//! transactions through it and the coordinator assembles and commits blocks
//! through it, so a template is never built from a pool/tip pair that is in
//! the middle of an update.

use crate::chain::ChainState;
use crate::error::Result;
use crate::pool::TransactionPool;
use crate::types::{Block, BlockTemplate, StorageAddress, Tip, Transaction};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct LedgerInner {
    pool: TransactionPool,
    chain: ChainState,
}

/// Pool and chain guarded by one lock
#[derive(Debug, Default)]
pub struct Ledger {
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    /// Empty pool, genesis tip
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                pool: TransactionPool::new(),
                chain: ChainState::new(),
            }),
        }
    }

    /// Append a transaction to the pool
    pub fn add_transaction(&self, tx: Transaction) -> usize {
        let mut inner = self.inner.lock();
        inner.pool.add(tx);
        inner.pool.len()
    }

    /// Take a batch and snapshot the tip in one step.
    ///
    /// Returns `None` without touching anything when fewer than `batch_size`
    /// transactions are pending.
    pub fn assemble(
        &self,
        batch_size: usize,
        creator: &str,
        difficulty: u32,
        timestamp: i64,
    ) -> Option<BlockTemplate> {
        let mut inner = self.inner.lock();
        let batch = inner.pool.try_take_batch(batch_size)?;
        let tip = inner.chain.snapshot();

        debug!(
            block_number = tip.next_block_number(),
            batch_size,
            remaining = inner.pool.len(),
            "Assembled block template"
        );

        Some(BlockTemplate::new(&tip, batch, timestamp, creator, difficulty))
    }

    /// Advance the tip to a published block
    pub fn commit(&self, block: &Block, storage_address: StorageAddress) -> Result<Tip> {
        self.inner.lock().chain.advance(block, storage_address)
    }

    /// Return a batch to the head of the pool in its original order
    pub fn requeue(&self, batch: Vec<Transaction>) {
        let count = batch.len();
        self.inner.lock().pool.requeue_front(batch);
        debug!(count, "Requeued batch at pool head");
    }

    /// Current tip
    pub fn tip(&self) -> Tip {
        self.inner.lock().chain.snapshot()
    }

    /// Number of pending transactions
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pool.len()
    }

    /// Copy of the pending transactions in FIFO order
    pub fn pending(&self) -> Vec<Transaction> {
        self.inner.lock().pool.pending().cloned().collect()
    }
}
