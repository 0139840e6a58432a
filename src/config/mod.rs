//! Flush scheduling configuration for the record sink.

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, SinkResult};

/// Batching and scheduling configuration for the flush worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FlushConfig {
    /// Minimum number of buffered records a stream must hold before a periodic flush pass
    /// drains it. Avoids wasteful record-wise writes.
    #[serde(default = "default_min_records")]
    pub min_records: usize,
    /// Maximum number of records written to a staging table in a single batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay, in milliseconds, between the end of one flush pass and the start of the next.
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,
}

impl FlushConfig {
    /// Default watermark below which a stream is not drained by periodic passes.
    pub const DEFAULT_MIN_RECORDS: usize = 500;

    /// Default maximum batch size for staging table inserts.
    pub const DEFAULT_BATCH_SIZE: usize = 500;

    /// Default fixed delay between flush passes in milliseconds.
    pub const DEFAULT_FLUSH_DELAY_MS: u64 = 500;

    /// Validates flush configuration settings.
    ///
    /// Ensures batch_size is non-zero, since a zero batch size would make every flush
    /// pass spin without draining anything.
    pub fn validate(&self) -> SinkResult<()> {
        if self.batch_size == 0 {
            bail!(
                ErrorKind::ConfigError,
                "invalid flush configuration",
                "batch_size must be greater than 0"
            );
        }

        Ok(())
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            min_records: default_min_records(),
            batch_size: default_batch_size(),
            flush_delay_ms: default_flush_delay_ms(),
        }
    }
}

fn default_min_records() -> usize {
    FlushConfig::DEFAULT_MIN_RECORDS
}

fn default_batch_size() -> usize {
    FlushConfig::DEFAULT_BATCH_SIZE
}

fn default_flush_delay_ms() -> u64 {
    FlushConfig::DEFAULT_FLUSH_DELAY_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: FlushConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.min_records, FlushConfig::DEFAULT_MIN_RECORDS);
        assert_eq!(config.batch_size, FlushConfig::DEFAULT_BATCH_SIZE);
        assert_eq!(config.flush_delay_ms, FlushConfig::DEFAULT_FLUSH_DELAY_MS);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = FlushConfig {
            batch_size: 0,
            ..FlushConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(FlushConfig::default().validate().is_ok());
    }
}
