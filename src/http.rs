//! Shared HTTP client construction

use crate::error::{Error, Result};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::debug;

/// Upper bound on establishing a connection, independent of the request timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a client with the node's user agent and the given request timeout
pub fn build_client(request_timeout: Duration) -> Result<Client> {
    let connect_timeout = CONNECT_TIMEOUT.min(request_timeout);

    debug!(
        ?request_timeout,
        ?connect_timeout,
        "Building HTTP client"
    );

    ClientBuilder::new()
        .user_agent(format!("compute-chain/{}", env!("CARGO_PKG_VERSION")))
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(60)))
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client() {
        assert!(build_client(Duration::from_secs(30)).is_ok());
        assert!(build_client(Duration::from_millis(500)).is_ok());
    }
}
