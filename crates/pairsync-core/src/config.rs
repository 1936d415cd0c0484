use std::time::Duration;

use pairsync_net::Backoff;
use pairsync_shared::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PULL_PAGE_SIZE, MAX_PULL_PAGE_SIZE,
};

/// Tunables of the sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Messages per channel in one `Objects` page.
    pub pull_page_size: u32,

    /// How long a connection may stay `connecting` before it is expired.
    pub connect_timeout: Duration,

    /// Reconnect delay policy exposed to the transport layer.
    pub backoff: Backoff,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_page_size: DEFAULT_PULL_PAGE_SIZE,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            backoff: Backoff::default(),
        }
    }
}

impl SyncConfig {
    /// Page size clamped to `1..=MAX_PULL_PAGE_SIZE`.
    pub fn page_size(&self) -> u32 {
        self.pull_page_size.clamp(1, MAX_PULL_PAGE_SIZE)
    }
}
