use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{ChunkStore, Result, WireChunk, error::UnavailableSnafu};

/// In-memory chunk store for tests and local development.
///
/// Deduplicates by chunk key like a real store and can be told to fail the
/// next N puts to exercise retry paths.
#[derive(Default)]
pub struct MemoryChunkStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    chunks: Vec<WireChunk>,
    keys: HashSet<String>,
    puts: usize,
    fail_puts: usize,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `put` fail.
    pub fn fail_next_puts(&self, n: usize) {
        self.state.lock().fail_puts = n;
    }

    /// All chunks accepted so far.
    pub fn chunks(&self) -> Vec<WireChunk> {
        self.state.lock().chunks.clone()
    }

    /// Number of `put` calls, including failed ones.
    pub fn put_count(&self) -> usize {
        self.state.lock().puts
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().keys.contains(key)
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(&self, chunks: Vec<WireChunk>) -> Result<()> {
        let mut state = self.state.lock();
        state.puts += 1;

        if state.fail_puts > 0 {
            state.fail_puts -= 1;
            return UnavailableSnafu {
                message: "injected put failure",
            }
            .fail();
        }

        for chunk in chunks {
            if state.keys.insert(chunk.key()) {
                state.chunks.push(chunk);
            }
        }

        Ok(())
    }
}
