//! Durable chunk storage.
//!
//! The flush path hands sealed, encoded chunks to a [`ChunkStore`] and never
//! looks at them again. Stores must be idempotent: a worker may re-issue the
//! same chunk after a failed or timed-out put, and the second write must
//! succeed without duplicating data. Chunk identity is the storage key
//! derived from `(tenant, fingerprint, bounds, payload checksum)`.

mod error;
mod memory;
mod object;
mod wire;

use async_trait::async_trait;

pub use self::{
    error::{ChunkStoreError, Result},
    memory::MemoryChunkStore,
    object::ObjectStoreChunkStore,
    wire::{WireChunk, round_to_millis},
};

/// Sink for sealed chunks.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persist every chunk in `chunks`, blocking until all are durable.
    ///
    /// Implementations deduplicate by [`WireChunk::key`] so retried puts of
    /// the same chunks are safe. Dropping the returned future cancels the
    /// operation; a cancelled or failed put leaves the caller free to retry.
    async fn put(&self, chunks: Vec<WireChunk>) -> Result<()>;
}
