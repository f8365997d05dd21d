//! Client side: publish a program and its input, then ask peers to run it

use crate::error::{Error, Result};
use crate::storage::IpfsStore;
use crate::types::{ContentRef, StorageAddress};
use futures::future::join_all;
use reqwest::Client;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of sending a request to one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReply {
    pub peer: String,
    pub accepted: bool,
    pub message: String,
}

/// Result of a whole submission
#[derive(Debug, Clone)]
pub struct SubmitReport {
    pub program: ContentRef,
    pub input: ContentRef,
    pub replies: Vec<PeerReply>,
}

impl SubmitReport {
    pub fn accepted(&self) -> usize {
        self.replies.iter().filter(|r| r.accepted).count()
    }
}

/// Suffix of a path including the dot, or empty when there is none
fn suffix_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Request body understood by `POST /receive`
pub fn receive_body(program: &ContentRef, input: &ContentRef) -> String {
    format!("{},{}", program, input)
}

/// Sends computation requests to peers
pub struct Submitter {
    store: IpfsStore,
    client: Client,
    peers: Vec<String>,
    port: u16,
}

impl Submitter {
    pub fn new(store: IpfsStore, client: Client, peers: Vec<String>, port: u16) -> Self {
        Self {
            store,
            client,
            peers,
            port,
        }
    }

    async fn upload(&self, path: &Path) -> Result<ContentRef> {
        let StorageAddress(address) = self.store.publish_file(path).await?;
        info!(file = %path.display(), address = %address, "Uploaded file");
        Ok(ContentRef::new(address, suffix_of(path)))
    }

    async fn send(&self, peer: &str, body: &str) -> PeerReply {
        let url = format!("http://{}:{}/receive", peer, self.port);
        let result = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body.to_string())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                PeerReply {
                    peer: peer.to_string(),
                    accepted: status.is_success(),
                    message: if text.is_empty() { status.to_string() } else { text },
                }
            }
            Err(e) => PeerReply {
                peer: peer.to_string(),
                accepted: false,
                message: Error::from(e).to_string(),
            },
        }
    }

    /// Upload both files, then send their addresses to every peer
    pub async fn submit(&self, program: &Path, input: &Path) -> Result<SubmitReport> {
        if self.peers.is_empty() {
            return Err(Error::config("no peers configured to submit to"));
        }

        let program = self.upload(program).await?;
        let input = self.upload(input).await?;
        let body = receive_body(&program, &input);

        let replies = join_all(self.peers.iter().map(|peer| self.send(peer, &body))).await;
        for reply in &replies {
            if reply.accepted {
                info!(peer = %reply.peer, "Peer accepted computation");
            } else {
                warn!(peer = %reply.peer, reason = %reply.message, "Peer rejected computation");
            }
        }

        Ok(SubmitReport {
            program,
            input,
            replies,
        })
    }
}
