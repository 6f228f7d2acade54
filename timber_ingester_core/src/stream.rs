use std::{collections::VecDeque, sync::Arc, time::SystemTime};

use parking_lot::RwLock;
use snafu::ResultExt;
use timber_chunk::{ChunkEncoder, EncoderConfig, build_chunk};
use timber_chunk_store::round_to_millis;
use timber_resources::{Entry, Fingerprint, LabelSet};
use tokio::time::Instant;

use crate::{
    config::IngesterOptions,
    error::{AppendSnafu, EntryOutOfOrderSnafu, PushError, StreamUnlinkedSnafu},
    metrics::FlushMetrics,
    replay::ReplayController,
};

/// An in-memory chunk plus its flush-lifecycle state.
///
/// All fields are protected by the owning stream's chunk lock.
pub(crate) struct ChunkDesc {
    pub(crate) id: u64,
    pub(crate) chunk: Box<dyn ChunkEncoder>,
    /// No further appends permitted. Set once, never cleared.
    pub(crate) closed: bool,
    /// Closure came from a sync-period cut rather than fullness.
    pub(crate) synced: bool,
    pub(crate) last_updated: Instant,
    /// Set exactly once, after successful persistence. The chunk is
    /// immutable from then on.
    pub(crate) flushed: Option<Instant>,
}

/// The chunk sequence of one stream, oldest at the front. Only the back
/// chunk may be open.
pub(crate) struct ChunkList {
    pub(crate) chunks: VecDeque<ChunkDesc>,
    /// Set when the reclaimer unlinks the stream from its tenant. Appends
    /// observing it retry against a freshly created stream.
    pub(crate) unlinked: bool,
    next_id: u64,
    last_entry: Option<SystemTime>,
}

impl ChunkList {
    pub(crate) fn chunk_mut(&mut self, id: u64) -> Option<&mut ChunkDesc> {
        self.chunks.iter_mut().find(|chunk| chunk.id == id)
    }
}

/// The entries sharing one label set, buffered as an ordered list of chunks.
///
/// Streams are owned by a tenant instance and carry only the tenant-agnostic
/// state; the tenant id travels with flush operations.
pub struct Stream {
    fingerprint: Fingerprint,
    labels: LabelSet,
    pub(crate) chunks: RwLock<ChunkList>,
    encoder: EncoderConfig,
    sync_period: std::time::Duration,
    metrics: FlushMetrics,
    replay: Arc<ReplayController>,
}

impl Stream {
    pub(crate) fn new(
        labels: LabelSet,
        options: &IngesterOptions,
        metrics: FlushMetrics,
        replay: Arc<ReplayController>,
    ) -> Self {
        Self {
            fingerprint: labels.fingerprint(),
            labels,
            chunks: RwLock::new(ChunkList {
                chunks: VecDeque::new(),
                unlinked: false,
                next_id: 0,
                last_entry: None,
            }),
            encoder: options.encoder_config(),
            sync_period: options.sync_period,
            metrics,
            replay,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Append `entries` to the active chunk, cutting new chunks as needed.
    ///
    /// Entries must be non-decreasing in time, and not older than anything
    /// already in the stream. The batch is validated up front so a rejected
    /// batch leaves the stream untouched.
    pub fn push(&self, entries: &[Entry]) -> Result<(), PushError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut list = self.chunks.write();
        if list.unlinked {
            return StreamUnlinkedSnafu.fail();
        }

        let mut last = list.last_entry;
        for entry in entries {
            if let Some(last) = last
                && entry.timestamp < last
            {
                return EntryOutOfOrderSnafu {
                    labels: self.labels.to_string(),
                }
                .fail();
            }
            last = Some(entry.timestamp);
        }

        let mut appended = 0usize;
        let mut result = Ok(());
        for entry in entries {
            self.ensure_open_tail(&mut list, entry.timestamp);
            let Some(tail) = list.chunks.back_mut() else {
                continue;
            };

            let before = tail.chunk.uncompressed_size();
            if let Err(err) = tail.chunk.append(entry).context(AppendSnafu) {
                result = Err(err);
                break;
            }
            tail.last_updated = Instant::now();
            appended += tail.chunk.uncompressed_size() - before;
            list.last_entry = Some(entry.timestamp);
        }
        drop(list);

        // Whatever made it in is accounted for, even on a partial failure.
        if appended > 0 {
            self.replay.add(appended);
        }

        result
    }

    /// Number of chunks held in memory.
    pub fn chunk_count(&self) -> usize {
        self.chunks.read().chunks.len()
    }

    /// Number of chunks not yet persisted.
    pub fn unflushed_chunk_count(&self) -> usize {
        self.chunks
            .read()
            .chunks
            .iter()
            .filter(|chunk| chunk.flushed.is_none())
            .count()
    }

    /// Make sure the back chunk is open for an entry at `ts`, cutting the
    /// current one when the entry crosses a sync window or the chunk
    /// reached its target size.
    fn ensure_open_tail(&self, list: &mut ChunkList, ts: SystemTime) {
        if let Some(tail) = list.chunks.back_mut()
            && !tail.closed
        {
            if self.crosses_sync_boundary(tail, ts) {
                tail.closed = true;
                tail.synced = true;
            } else if tail.chunk.uncompressed_size() >= self.encoder.target_chunk_size {
                tail.closed = true;
            } else {
                return;
            }
        }

        let id = list.next_id;
        list.next_id += 1;
        list.chunks.push_back(ChunkDesc {
            id,
            chunk: build_chunk(&self.encoder),
            closed: false,
            synced: false,
            last_updated: Instant::now(),
            flushed: None,
        });
        self.metrics.memory_chunks.add(1, &[]);
    }

    fn crosses_sync_boundary(&self, tail: &ChunkDesc, ts: SystemTime) -> bool {
        let period = self.sync_period.as_millis() as i64;
        if period == 0 {
            return false;
        }

        let Some((_, last)) = tail.chunk.bounds() else {
            return false;
        };

        round_to_millis(ts) / period != round_to_millis(last) / period
    }
}
