//! Audit pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the audit pipeline.
///
/// # Example (TOML)
///
/// ```toml
/// [audit]
/// buffer_size = 10000
/// flush_interval = "1s"
/// batch_size = 100
/// write_timeout = "5s"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Capacity of the ingest buffer. When full, `log` drops the event.
    pub buffer_size: usize,

    /// How often the batcher flushes even when the batch is not full.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Maximum events per batch write.
    pub batch_size: usize,

    /// Deadline for one batch write (and for synchronous writes).
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            flush_interval: Duration::from_secs(1),
            batch_size: 100,
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.buffer_size, 10_000);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_humantime_durations() {
        let config: AuditConfig =
            serde_json::from_str(r#"{ "flush_interval": "250ms", "buffer_size": 2 }"#).unwrap();
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.buffer_size, 2);
        assert_eq!(config.batch_size, 100);
    }
}
