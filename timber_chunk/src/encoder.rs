use std::{io::Write, time::SystemTime};

use snafu::Snafu;
use timber_resources::Entry;

use crate::block::BlockChunk;

/// Chunk codec error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChunkError {
    #[snafu(display("chunk is closed"))]
    Closed,
    #[snafu(display("entry out of order: {entry_ms}ms is before {last_ms}ms"))]
    EntryOutOfOrder { entry_ms: u64, last_ms: u64 },
    #[snafu(display("failed to write encoded chunk"))]
    Io { source: std::io::Error },
}

pub type Result<T, E = ChunkError> = std::result::Result<T, E>;

/// Per-block compression applied while encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    #[default]
    Lz4 = 1,
}

/// Configuration for the concrete chunk codec.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub compression: Compression,
    /// Entries accumulate in an uncompressed head block; when it reaches
    /// this size the block is sealed and compressed.
    pub block_size: usize,
    /// The size a chunk aims for before the stream cuts a new one. Only
    /// used to report utilization.
    pub target_chunk_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            block_size: 256 * 1024,
            target_chunk_size: 1536 * 1024,
        }
    }
}

/// Capability set the flush path needs from a chunk.
///
/// Implementations accumulate entries until [`close`](ChunkEncoder::close)
/// is called, after which the chunk is immutable and can be encoded any
/// number of times. `close` is idempotent; `append` fails once the chunk is
/// closed.
pub trait ChunkEncoder: Send + Sync {
    /// Append an entry. Entries must be non-decreasing in time.
    fn append(&mut self, entry: &Entry) -> Result<()>;

    /// Seal the chunk. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// Timestamps of the first and last entry, or `None` while empty.
    fn bounds(&self) -> Option<(SystemTime, SystemTime)>;

    /// Number of appended entries.
    fn entries(&self) -> usize;

    /// Total size of the raw entry payload.
    fn uncompressed_size(&self) -> usize;

    /// Estimated size of the encoded payload.
    fn bytes_size(&self) -> usize;

    /// Fraction of the target chunk size this chunk has reached.
    fn utilization(&self) -> f64;

    /// Write the encoded representation to `sink`.
    fn encode_to(&self, sink: &mut dyn Write) -> Result<()>;
}

/// Build the chunk codec selected by `config`.
pub fn build_chunk(config: &EncoderConfig) -> Box<dyn ChunkEncoder> {
    Box::new(BlockChunk::new(config))
}
