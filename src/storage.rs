//! Content-addressed storage
//!
//! The node needs two things from storage: fetch the program and input a
//! client published, and publish mined blocks to obtain the address the next
//! block links back to. [`IpfsStore`] talks to a local IPFS daemon;
//! [`MemoryStore`] keeps everything in process.

use crate::error::{Error, Result};
use crate::types::StorageAddress;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// Content-addressed storage collaborator
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `data` and return its address
    async fn publish(&self, data: Bytes) -> Result<StorageAddress>;

    /// Retrieve the content stored at `address`
    async fn fetch(&self, address: &StorageAddress) -> Result<Bytes>;
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// IPFS daemon client: uploads through the HTTP API, downloads through the gateway
#[derive(Debug, Clone)]
pub struct IpfsStore {
    client: Client,
    api_url: String,
    gateway_url: String,
}

impl IpfsStore {
    /// Create a client for the given API and gateway endpoints
    pub fn new(api_url: &Url, gateway_url: &Url, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: crate::http::build_client(timeout)?,
            api_url: api_url.as_str().trim_end_matches('/').to_string(),
            gateway_url: gateway_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Upload a local file under its own file name
    pub async fn publish_file(&self, path: &Path) -> Result<StorageAddress> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        self.add(Bytes::from(data), file_name).await
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn add(&self, data: Bytes, file_name: String) -> Result<StorageAddress> {
        let url = format!("{}/api/v0/add", self.api_url);
        let part = Part::bytes(data.to_vec()).file_name(file_name);
        let form = Form::new().part("file", part);

        let response = self.client.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::storage(format!(
                "IPFS upload failed with status {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| Error::storage(format!("Failed to decode IPFS response: {}", e)))?;

        debug!(address = %added.hash, "Uploaded content to IPFS");
        Ok(StorageAddress::new(added.hash))
    }
}

#[async_trait]
impl ContentStore for IpfsStore {
    async fn publish(&self, data: Bytes) -> Result<StorageAddress> {
        self.add(data, "block.json".to_string()).await
    }

    #[instrument(skip_all, fields(address = %address))]
    async fn fetch(&self, address: &StorageAddress) -> Result<Bytes> {
        let url = format!("{}/ipfs/{}", self.gateway_url, address);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::storage(format!(
                "IPFS download of {} failed with status {}: {}",
                address,
                status.as_u16(),
                body.trim()
            )));
        }

        let data = response.bytes().await?;
        debug!(size = data.len(), "Downloaded content from IPFS");
        Ok(data)
    }
}

/// In-process store addressing content by its SHA-256 digest
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<StorageAddress, Bytes>>,
    failing: AtomicBool,
    publish_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address content would be stored under
    pub fn address_of(data: &[u8]) -> StorageAddress {
        StorageAddress::new(hex::encode(Sha256::digest(data)))
    }

    /// Store content directly, bypassing the failure switch
    pub fn insert(&self, data: impl Into<Bytes>) -> StorageAddress {
        let data = data.into();
        let address = Self::address_of(&data);
        self.objects.lock().insert(address.clone(), data);
        address
    }

    /// Make every subsequent publish and fetch fail with a storage error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
        if failing {
            info!("Memory store switched to failing mode");
        }
    }

    pub fn get(&self, address: &StorageAddress) -> Option<Bytes> {
        self.objects.lock().get(address).cloned()
    }

    /// Publish calls seen so far, failed ones included
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn publish(&self, data: Bytes) -> Result<StorageAddress> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::storage("memory store unavailable"));
        }
        Ok(self.insert(data))
    }

    async fn fetch(&self, address: &StorageAddress) -> Result<Bytes> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::storage("memory store unavailable"));
        }
        self.get(address)
            .ok_or_else(|| Error::storage(format!("no content at {}", address)))
    }
}
