//! Connectivity probe
//!
//! Answers "can we reach the sync server right now?". The answer is never
//! cached, and an unknown state counts as offline so that no pass is started
//! on a guess.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Probe that issues a `HEAD` request to a known URL.
///
/// Any HTTP response, whatever its status, proves the network path works.
pub struct HttpProbe {
    client: Option<Client>,
    url: Url,
}

impl HttpProbe {
    pub fn new(url: Url) -> Self {
        Self::with_timeout(url, Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS))
    }

    pub fn with_timeout(url: Url, timeout: Duration) -> Self {
        let client = match Client::builder().timeout(timeout).build() {
            Ok(client) => Some(client),
            Err(e) => {
                log::error!("Failed to build connectivity probe client: {}", e);
                None
            }
        };
        Self { client, url }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };

        match client.head(self.url.clone()).send().await {
            Ok(response) => {
                log::debug!("Connectivity probe: {} -> {}", self.url, response.status());
                true
            }
            Err(e) => {
                log::info!("Connectivity probe failed, assuming offline: {}", e);
                false
            }
        }
    }
}

/// Probe with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.0
    }
}
