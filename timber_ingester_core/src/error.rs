use std::time::Duration;

use snafu::Snafu;
use timber_chunk::ChunkError;
use timber_chunk_store::ChunkStoreError;

/// Errors surfaced to foreground writers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PushError {
    #[snafu(display("entry for stream {labels} is out of order"))]
    EntryOutOfOrder { labels: String },
    #[snafu(display("failed to append entry"))]
    Append { source: ChunkError },
    /// The reclaimer unlinked the stream between lookup and append; the
    /// ingester retries against a fresh stream.
    #[snafu(display("stream was removed concurrently"))]
    StreamUnlinked,
}

/// Errors produced on the flush path.
///
/// These never escape the workers: failed shutdown flushes are re-queued and
/// everything else is logged and left for the next sweep to re-evaluate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FlushError {
    #[snafu(display("failed to encode chunk"))]
    Encode { source: ChunkError },
    #[snafu(display("failed to store chunks"))]
    Store { source: ChunkStoreError },
    #[snafu(display("flush timed out after {timeout:?}"))]
    FlushTimeout { timeout: Duration },
}
