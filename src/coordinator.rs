//! Mining coordinator
//!
//! Drives one block through its life: take a batch and the tip from the
//! ledger, search for a nonce off the async workers, publish the sealed block
//! to storage, commit it as the new tip and announce it. Announcements run in
//! the background and never hold up the next attempt. Any failure before the
//! commit hands the batch back to the head of the pool.
//!
//! ```text
//! Idle -> Assembling -> Searching -> Publishing -> Committing -> Idle
//! ```

use crate::broadcast::BlockAnnouncer;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::pow::{ProofOfWorkEngine, MAX_DIFFICULTY};
use crate::retry::RetryPolicy;
use crate::storage::ContentStore;
use crate::types::{Block, BlockTemplate, StorageAddress, Tip};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Per-node mining parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningSettings {
    /// Transactions per block
    pub batch_size: usize,
    /// Leading '0' hex characters required of a block hash
    pub difficulty: u32,
    /// Identifier recorded as the creator of mined blocks
    pub creator: String,
}

impl MiningSettings {
    /// Reject settings no attempt could ever satisfy
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch size must be at least 1"));
        }
        if self.difficulty > MAX_DIFFICULTY {
            return Err(Error::config(format!(
                "difficulty {} exceeds the maximum of {}",
                self.difficulty, MAX_DIFFICULTY
            )));
        }
        if self.creator.trim().is_empty() {
            return Err(Error::config("creator must not be empty"));
        }
        Ok(())
    }
}

impl Default for MiningSettings {
    fn default() -> Self {
        Self {
            batch_size: 3,
            difficulty: 4,
            creator: "compute-chain".to_string(),
        }
    }
}

/// Phase of the current mining attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Idle,
    Assembling,
    Searching,
    Publishing,
    Committing,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Assembling => "assembling",
            CoordinatorState::Searching => "searching",
            CoordinatorState::Publishing => "publishing",
            CoordinatorState::Committing => "committing",
        };
        f.write_str(name)
    }
}

/// Result of a single mining attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Fewer than a batch of transactions were pending
    NoBatch,
    /// A block was published and became the new tip
    Committed { block: Block, tip: Tip },
}

/// Snapshot of the coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningStats {
    pub blocks_mined: u64,
    pub hashes_tried: u64,
    pub publish_failures: u64,
    pub commit_conflicts: u64,
    pub aborted_attempts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    blocks_mined: AtomicU64,
    hashes_tried: AtomicU64,
    publish_failures: AtomicU64,
    commit_conflicts: AtomicU64,
    aborted_attempts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MiningStats {
        MiningStats {
            blocks_mined: self.blocks_mined.load(Ordering::Relaxed),
            hashes_tried: self.hashes_tried.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            commit_conflicts: self.commit_conflicts.load(Ordering::Relaxed),
            aborted_attempts: self.aborted_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Orchestrates assembly, search, publication, commit and announcement
pub struct MiningCoordinator {
    ledger: Arc<Ledger>,
    store: Arc<dyn ContentStore>,
    announcer: Arc<dyn BlockAnnouncer>,
    engine: ProofOfWorkEngine,
    settings: MiningSettings,
    retry: RetryPolicy,
    state: RwLock<CoordinatorState>,
    counters: Counters,
    wakeup: Notify,
    shutdown: CancellationToken,
    announcements: TaskTracker,
}

impl MiningCoordinator {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<dyn ContentStore>,
        announcer: Arc<dyn BlockAnnouncer>,
        settings: MiningSettings,
        retry: RetryPolicy,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            ledger,
            store,
            announcer,
            engine: ProofOfWorkEngine::new(),
            settings,
            retry,
            state: RwLock::new(CoordinatorState::Idle),
            counters: Counters::default(),
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            announcements: TaskTracker::new(),
        })
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn settings(&self) -> &MiningSettings {
        &self.settings
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    pub fn stats(&self) -> MiningStats {
        self.counters.snapshot()
    }

    /// Wake the mining loop. A wakeup sent while an attempt is running is kept
    /// until the loop next waits.
    pub fn trigger(&self) {
        self.wakeup.notify_one();
    }

    /// Stop the loop and abort any search in progress
    pub fn shutdown(&self) {
        info!("Shutting down mining coordinator");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for announcements already handed to the broadcast collaborator.
    /// Announcements started afterwards are still tracked.
    pub async fn wait_for_announcements(&self) {
        self.announcements.close();
        self.announcements.wait().await;
    }

    fn set_state(&self, state: CoordinatorState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "Coordinator state changed");
        }
    }

    fn template_for(&self, tip: &Tip, template: BlockTemplate) -> BlockTemplate {
        BlockTemplate::new(
            tip,
            template.transactions,
            chrono::Utc::now().timestamp(),
            self.settings.creator.clone(),
            self.settings.difficulty,
        )
    }

    /// Mine until no full batch is pending, then wait for a trigger. Returns
    /// after [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        info!(
            batch_size = self.settings.batch_size,
            difficulty = self.settings.difficulty,
            creator = %self.settings.creator,
            "Mining coordinator started"
        );

        loop {
            loop {
                match self.mine_once().await {
                    Ok(AttemptOutcome::Committed { .. }) => continue,
                    Ok(AttemptOutcome::NoBatch) => break,
                    Err(Error::Cancelled { .. }) => break,
                    Err(e) if e.is_collaborator_failure() => {
                        // Batch is back in the pool; wait for the next trigger.
                        warn!(error = %e, category = e.category(), "Mining attempt failed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, category = e.category(), "Mining attempt failed");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.set_state(CoordinatorState::Idle);
        info!("Mining coordinator stopped");
    }

    /// One full attempt: assemble, search, publish, commit, announce.
    ///
    /// A commit rejected because another attempt already advanced the tip is
    /// retried with the same batch against the fresh tip. Any other failure
    /// returns the batch to the pool head and is reported to the caller.
    pub async fn mine_once(&self) -> Result<AttemptOutcome> {
        if self.shutdown.is_cancelled() {
            return Err(Error::cancelled("mining coordinator is shut down"));
        }

        self.set_state(CoordinatorState::Assembling);
        let Some(mut template) = self.ledger.assemble(
            self.settings.batch_size,
            &self.settings.creator,
            self.settings.difficulty,
            chrono::Utc::now().timestamp(),
        ) else {
            self.set_state(CoordinatorState::Idle);
            return Ok(AttemptOutcome::NoBatch);
        };

        loop {
            match self.attempt(&template).await {
                Ok((block, tip)) => {
                    self.counters.blocks_mined.fetch_add(1, Ordering::Relaxed);
                    self.announce(&block);
                    self.set_state(CoordinatorState::Idle);
                    return Ok(AttemptOutcome::Committed { block, tip });
                }
                Err(Error::InvariantViolation { message }) => {
                    self.counters.commit_conflicts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        block_number = template.block_number,
                        reason = %message,
                        "Discarding block that lost the race for the tip, re-mining batch"
                    );
                    let tip = self.ledger.tip();
                    template = self.template_for(&tip, template);
                }
                Err(e) => {
                    self.counters.aborted_attempts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        block_number = template.block_number,
                        error = %e,
                        category = e.category(),
                        "Mining attempt aborted, returning batch to pool"
                    );
                    self.ledger.requeue(template.transactions);
                    self.set_state(CoordinatorState::Idle);
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, template: &BlockTemplate) -> Result<(Block, Tip)> {
        self.set_state(CoordinatorState::Searching);
        let solution = self
            .engine
            .mine(template.clone(), self.shutdown.child_token())
            .await?;
        self.counters
            .hashes_tried
            .fetch_add(solution.hashes_tried, Ordering::Relaxed);

        let block = template.clone().seal(solution.nonce, solution.hash);

        self.set_state(CoordinatorState::Publishing);
        let address = self.publish(&block).await?;

        self.set_state(CoordinatorState::Committing);
        let tip = self.ledger.commit(&block, address)?;

        info!(
            block_number = block.block_number,
            hash = %block.hash,
            nonce = block.nonce.value(),
            storage_address = %tip.storage_address,
            previous_hash = %block.previous_hash,
            "Committed new block"
        );
        Ok((block, tip))
    }

    async fn publish(&self, block: &Block) -> Result<StorageAddress> {
        let encoded = Bytes::from(block.to_json_bytes()?);
        let result = self
            .retry
            .execute("publish block", || self.store.publish(encoded.clone()))
            .await;

        if let Err(e) = &result {
            self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                block_number = block.block_number,
                hash = %block.short_hash(),
                error = %e,
                "Block publication failed, tip not advanced"
            );
        }
        result
    }

    /// Hand the block to the broadcast collaborator without waiting on peers
    fn announce(&self, block: &Block) {
        let announcer = Arc::clone(&self.announcer);
        let block = block.clone();
        self.announcements.spawn(async move {
            if let Err(e) = announcer.announce(&block).await {
                warn!(
                    block_number = block.block_number,
                    error = %e,
                    category = e.category(),
                    "Block announcement failed"
                );
            }
        });
    }
}
