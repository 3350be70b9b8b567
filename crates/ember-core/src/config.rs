// ── Runtime sync configuration ──
//
// Describes how to reach the service and how the fallback poller
// behaves. Built by the embedding app (or ember-config) and handed in;
// core never reads files.

use std::time::Duration;

use ember_remote::Credentials;

/// Shared poll interval for every consumer's fallback reload.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for one sync layer instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Endpoint and session token.
    pub credentials: Credentials,
    /// Fallback reload cadence while connected and foregrounded.
    pub poll_interval: Duration,
}

impl SyncConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
