use std::time::Duration;

use snafu::Snafu;
use timber_chunk::{Compression, EncoderConfig};

#[derive(Debug, Snafu)]
pub enum OptionsError {
    #[snafu(display("invalid ingester options: {message}"))]
    InvalidOptions { message: &'static str },
}

/// Ingester tuning options.
#[derive(Debug, Clone)]
pub struct IngesterOptions {
    /// Number of flush queues and the workers draining them. A stream is
    /// pinned to the queue at `fingerprint mod concurrent_flushes` for the
    /// lifetime of the process.
    pub concurrent_flushes: usize,
    /// How often the sweeper scans all streams for flushable chunks.
    pub flush_check_period: Duration,
    /// Deadline for a single persistence operation.
    pub flush_op_timeout: Duration,
    /// Chunks with no appends for longer than this are flushed.
    pub max_chunk_idle: Duration,
    /// Chunks whose entries span more than this are flushed.
    pub max_chunk_age: Duration,
    /// How long flushed chunks stay in memory before reclamation.
    pub retain_period: Duration,
    /// Cut the active chunk when an entry crosses into a new window of this
    /// length. Zero disables sync cuts.
    pub sync_period: Duration,
    /// Compression applied to chunk blocks.
    pub compression: Compression,
    /// Size at which a chunk block is sealed and compressed.
    pub block_size: usize,
    /// Size at which the active chunk is cut and a new one opened.
    pub target_chunk_size: usize,
    /// In-memory payload bytes above which WAL replay pauses.
    pub replay_memory_ceiling: usize,
}

impl Default for IngesterOptions {
    fn default() -> Self {
        Self {
            concurrent_flushes: 16,
            flush_check_period: Duration::from_secs(30),
            flush_op_timeout: Duration::from_secs(10),
            max_chunk_idle: Duration::from_secs(30 * 60),
            max_chunk_age: Duration::from_secs(2 * 60 * 60),
            retain_period: Duration::from_secs(15 * 60),
            sync_period: Duration::ZERO,
            compression: Compression::default(),
            block_size: 256 * 1024,
            target_chunk_size: 1536 * 1024,
            replay_memory_ceiling: 4 * 1024 * 1024 * 1024,
        }
    }
}

impl IngesterOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.concurrent_flushes == 0 {
            return InvalidOptionsSnafu {
                message: "concurrent_flushes must be greater than zero",
            }
            .fail();
        }
        if self.block_size == 0 || self.target_chunk_size == 0 {
            return InvalidOptionsSnafu {
                message: "block_size and target_chunk_size must be greater than zero",
            }
            .fail();
        }
        if self.flush_check_period.is_zero() {
            return InvalidOptionsSnafu {
                message: "flush_check_period must be greater than zero",
            }
            .fail();
        }

        Ok(())
    }

    /// Codec configuration handed to every new chunk.
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            compression: self.compression,
            block_size: self.block_size,
            target_chunk_size: self.target_chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        IngesterOptions::default().validate().unwrap();
    }

    #[test]
    fn test_zero_concurrent_flushes_is_rejected() {
        let options = IngesterOptions {
            concurrent_flushes: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
