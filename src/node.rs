//! Wiring of a complete node: collaborators, coordinator and HTTP server

use crate::broadcast::HttpAnnouncer;
use crate::config::NodeConfig;
use crate::coordinator::MiningCoordinator;
use crate::error::Result;
use crate::executor::{Executor, ScriptExecutor};
use crate::ledger::Ledger;
use crate::server::{self, AppState};
use crate::storage::{ContentStore, IpfsStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A running node's components
pub struct Node {
    coordinator: Arc<MiningCoordinator>,
    executor: Arc<dyn Executor>,
}

impl Node {
    pub fn new(coordinator: Arc<MiningCoordinator>, executor: Arc<dyn Executor>) -> Self {
        Self {
            coordinator,
            executor,
        }
    }

    /// Build a node backed by IPFS, a local interpreter and HTTP peers
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let http_timeout = config.http_timeout()?;

        let store: Arc<dyn ContentStore> = Arc::new(IpfsStore::new(
            &config.api_url()?,
            &config.gateway_url()?,
            http_timeout,
        )?);

        std::fs::create_dir_all(&config.execution.work_dir)?;
        let executor = Arc::new(ScriptExecutor::new(
            store.clone(),
            config.execution.interpreter.clone(),
            config.execution.work_dir.clone(),
            config.execution_timeout()?,
        ));

        let announcer = Arc::new(HttpAnnouncer::new(
            config.broadcast.peers.clone(),
            config.broadcast.peer_port,
            config.broadcast.path.clone(),
            http_timeout,
        )?);

        let settings = config.mining_settings();
        info!(
            creator = %settings.creator,
            batch_size = settings.batch_size,
            difficulty = settings.difficulty,
            peers = config.broadcast.peers.len(),
            "Node configured"
        );

        let coordinator = Arc::new(MiningCoordinator::new(
            Arc::new(Ledger::new()),
            store,
            announcer,
            settings,
            config.retry_policy()?,
        )?);

        Ok(Self::new(coordinator, executor))
    }

    pub fn coordinator(&self) -> &Arc<MiningCoordinator> {
        &self.coordinator
    }

    /// Serve requests and mine until `shutdown` fires
    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let mining = {
            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move { coordinator.run().await })
        };

        let state = AppState {
            coordinator: Arc::clone(&self.coordinator),
            executor: Arc::clone(&self.executor),
        };
        let served = server::serve(listener, state, shutdown).await;

        self.coordinator.shutdown();
        if let Err(e) = mining.await {
            error!(error = %e, "Mining task ended abnormally");
        }
        self.coordinator.wait_for_announcements().await;

        let tip = self.coordinator.ledger().tip();
        info!(
            block_number = tip.block_number,
            hash = %tip.hash,
            pending = self.coordinator.ledger().pending_len(),
            "Node stopped"
        );
        served
    }
}
