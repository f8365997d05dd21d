//! Best-effort block announcement to peers

use crate::error::{Error, Result};
use crate::types::Block;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Broadcast collaborator
#[async_trait]
pub trait BlockAnnouncer: Send + Sync {
    /// Tell peers about a committed block. Replies are not validated, and the
    /// mining loop does not wait for this call to finish.
    async fn announce(&self, block: &Block) -> Result<()>;
}

/// Posts blocks as JSON to every configured peer
pub struct HttpAnnouncer {
    client: Client,
    peers: Vec<String>,
    port: u16,
    path: String,
    failed_deliveries: AtomicU64,
}

impl HttpAnnouncer {
    pub fn new(peers: Vec<String>, port: u16, path: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Ok(Self {
            client: crate::http::build_client(timeout)?,
            peers,
            port,
            path,
            failed_deliveries: AtomicU64::new(0),
        })
    }

    fn peer_url(&self, peer: &str) -> String {
        format!("http://{}:{}{}", peer, self.port, self.path)
    }

    /// Deliveries that failed since startup
    pub fn failed_deliveries(&self) -> u64 {
        self.failed_deliveries.load(Ordering::Relaxed)
    }

    async fn deliver(&self, peer: &str, block: &Block) -> Result<()> {
        let url = self.peer_url(peer);
        let response = self.client.post(&url).json(block).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::broadcast(format!("{} answered {}", url, status)));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockAnnouncer for HttpAnnouncer {
    #[instrument(skip(self, block), fields(block_number = block.block_number, hash = %block.short_hash()))]
    async fn announce(&self, block: &Block) -> Result<()> {
        if self.peers.is_empty() {
            info!(block = %block, "No peers configured, block announced locally only");
            return Ok(());
        }

        let results = join_all(self.peers.iter().map(|peer| self.deliver(peer, block))).await;

        let mut failed = 0;
        for (peer, result) in self.peers.iter().zip(&results) {
            match result {
                Ok(()) => debug!(peer = %peer, "Block delivered"),
                Err(e) => {
                    failed += 1;
                    warn!(peer = %peer, error = %e, "Block delivery failed");
                }
            }
        }
        self.failed_deliveries.fetch_add(failed as u64, Ordering::Relaxed);

        if failed == self.peers.len() {
            return Err(Error::broadcast(format!(
                "block #{} reached none of {} peers",
                block.block_number, failed
            )));
        }

        info!(
            delivered = self.peers.len() - failed,
            failed,
            "Block announced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockTemplate, Nonce, Tip, Transaction};
    use assert_matches::assert_matches;

    fn block() -> Block {
        BlockTemplate::new(
            &Tip::genesis(),
            vec![Transaction::new("10.0.0.1", "ok")],
            1_700_000_000,
            "node-a",
            1,
        )
        .seal(Nonce::new(9), "0abc".to_string())
    }

    fn host_and_port(server: &mockito::ServerGuard) -> (String, u16) {
        let addr = server.host_with_port();
        let (host, port) = addr.rsplit_once(':').unwrap();
        (host.to_string(), port.parse().unwrap())
    }

    #[tokio::test]
    async fn test_no_peers_is_ok() {
        let announcer = HttpAnnouncer::new(vec![], 8080, "/blocks", Duration::from_secs(1)).unwrap();
        announcer.announce(&block()).await.unwrap();
        assert_eq!(announcer.failed_deliveries(), 0);
    }

    #[tokio::test]
    async fn test_posts_block_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/blocks")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"blockNumber":1,"hash":"0abc","nonce":9}"#.to_string(),
            ))
            .with_status(200)
            .create_async()
            .await;

        let (host, port) = host_and_port(&server);
        let announcer = HttpAnnouncer::new(vec![host], port, "blocks", Duration::from_secs(5)).unwrap();

        announcer.announce(&block()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/blocks")
            .with_status(200)
            .create_async()
            .await;

        let (host, port) = host_and_port(&server);
        // The second peer name never resolves
        let announcer = HttpAnnouncer::new(
            vec![host, "peer.invalid".to_string()],
            port,
            "/blocks",
            Duration::from_secs(2),
        )
        .unwrap();

        announcer.announce(&block()).await.unwrap();
        assert_eq!(announcer.failed_deliveries(), 1);
    }

    #[tokio::test]
    async fn test_all_peers_failing_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/blocks")
            .with_status(503)
            .create_async()
            .await;

        let (host, port) = host_and_port(&server);
        let announcer = HttpAnnouncer::new(vec![host], port, "/blocks", Duration::from_secs(5)).unwrap();

        let err = announcer.announce(&block()).await.unwrap_err();
        assert_matches!(err, Error::Broadcast { .. });
        assert_eq!(announcer.failed_deliveries(), 1);
    }
}
