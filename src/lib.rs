//! Compute Chain
//!
//! A peer node for outsourced computation. Clients publish a program and its
//! input to content-addressed storage; nodes fetch and run them and record
//! each result as a transaction in a locally mined chain of blocks:
//! - FIFO transaction pool drained in fixed-size batches
//! - SHA-256 proof-of-work with a leading-zero difficulty
//! - Blocks linked to their predecessor by hash and by storage address
//! - IPFS storage, script execution and HTTP block announcement

pub mod broadcast;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod http;
pub mod ledger;
pub mod logging;
pub mod node;
pub mod pool;
pub mod pow;
pub mod retry;
pub mod server;
pub mod storage;
pub mod submit;
pub mod types;

pub use config::NodeConfig;
pub use coordinator::{AttemptOutcome, MiningCoordinator, MiningSettings};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use types::*;

/// Application information
pub const APP_NAME: &str = "compute-chain";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
