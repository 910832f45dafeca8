//! Staging policy configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to the captured operations once the backend answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueRetention {
    /// Drop every captured operation, failed ones included
    #[default]
    ClearAll,
    /// Drop only acknowledged operations; failed and unanswered ones stay
    /// staged for another attempt
    RetainFailed,
}

/// Core staging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Upper bound on one batch submission, in milliseconds
    pub commit_timeout_ms: u64,
    pub queue_retention: QueueRetention,
    /// Characters of body text shown in previews and failure notices
    pub preview_chars: usize,
    /// How long a fetched snapshot is served without refreshing
    pub snapshot_ttl_secs: i64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            commit_timeout_ms: 30_000,
            queue_retention: QueueRetention::ClearAll,
            preview_chars: 255,
            snapshot_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl StageConfig {
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    /// Snapshot TTL. Values beyond chrono's range saturate.
    pub fn snapshot_ttl(&self) -> chrono::Duration {
        let saturated = if self.snapshot_ttl_secs < 0 {
            chrono::Duration::MIN
        } else {
            chrono::Duration::MAX
        };
        chrono::Duration::try_seconds(self.snapshot_ttl_secs).unwrap_or(saturated)
    }

    /// Parse a config document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_retention(mut self, retention: QueueRetention) -> Self {
        self.queue_retention = retention;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StageConfig::default();
        assert_eq!(config.commit_timeout(), Duration::from_secs(30));
        assert_eq!(config.queue_retention, QueueRetention::ClearAll);
        assert_eq!(config.snapshot_ttl(), chrono::Duration::days(7));
    }

    #[test]
    fn huge_ttl_saturates() {
        let config = StageConfig::from_json(r#"{"snapshot_ttl_secs": 9000000000000000}"#).unwrap();
        assert_eq!(config.snapshot_ttl(), chrono::Duration::MAX);
        let config = StageConfig::from_json(r#"{"snapshot_ttl_secs": -9000000000000000}"#).unwrap();
        assert_eq!(config.snapshot_ttl(), chrono::Duration::MIN);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            StageConfig::from_json(r#"{"queue_retention": "retain_failed", "preview_chars": 50}"#)
                .unwrap();
        assert_eq!(config.queue_retention, QueueRetention::RetainFailed);
        assert_eq!(config.preview_chars, 50);
        assert_eq!(config.commit_timeout_ms, 30_000);
    }
}
