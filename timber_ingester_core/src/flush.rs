use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use snafu::ResultExt;
use timber_chunk::ChunkEncoder as _;
use timber_chunk_store::{ChunkStore as _, WireChunk, round_to_millis};
use timber_observability::KeyValue;
use timber_resources::{Fingerprint, TenantName};
use tokio::time::Instant;
use tracing::{debug, error};

use crate::{
    error::{EncodeSnafu, FlushError, FlushTimeoutSnafu, StoreSnafu},
    ingester::Ingester,
    instance::TenantInstance,
    queue::{FlushQueue, QueueItem},
    stream::{ChunkDesc, Stream},
};

// Backoff for retrying forced flushes. Only counts for queue position, not
// wallclock time.
const FLUSH_BACKOFF: Duration = Duration::from_secs(1);

// Room for the storage envelope on top of the encoded chunk payload.
const ENCODE_HEADROOM: usize = 4 * 1024;

const NAME_LABEL: &str = "__name__";
const LOGS_VALUE: &str = "logs";

/// Why a chunk was selected for flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Idle,
    MaxAge,
    Forced,
    Full,
    Synced,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Idle => "idle",
            FlushReason::MaxAge => "max_age",
            FlushReason::Forced => "forced",
            FlushReason::Full => "full",
            FlushReason::Synced => "synced",
        }
    }
}

/// A scheduled flush of one stream.
#[derive(Debug, Clone)]
pub struct FlushOp {
    pub(crate) from_ms: i64,
    pub(crate) tenant: TenantName,
    pub(crate) fingerprint: Fingerprint,
    pub(crate) immediate: bool,
}

impl QueueItem for FlushOp {
    fn key(&self) -> String {
        // The immediate bit keeps forced ops from collapsing into a pending
        // periodic one.
        format!("{}-{}-{}", self.tenant, self.fingerprint, self.immediate)
    }

    fn priority(&self) -> i64 {
        // Older data flushes first.
        -self.from_ms
    }
}

pub(crate) fn flush_queue_index(fingerprint: Fingerprint, queues: usize) -> usize {
    (fingerprint.as_u64() % queues as u64) as usize
}

impl Ingester {
    /// Schedule flushes for every stream of every tenant and reclaim chunks
    /// past retention.
    pub fn sweep_tenants(&self, immediate: bool, may_remove_streams: bool) {
        for instance in self.get_instances() {
            self.sweep_instance(&instance, immediate, may_remove_streams);
        }
    }

    fn sweep_instance(
        &self,
        instance: &Arc<TenantInstance>,
        immediate: bool,
        may_remove_streams: bool,
    ) {
        for stream in instance.streams() {
            self.sweep_stream(instance, &stream, immediate);
            self.remove_flushed_chunks(instance, &stream, may_remove_streams);
        }
    }

    fn sweep_stream(&self, instance: &TenantInstance, stream: &Stream, immediate: bool) {
        let list = stream.chunks.read();
        if list.chunks.is_empty() {
            return;
        }

        // An active stream whose only chunk is still filling is left alone
        // so the sweeper doesn't churn it.
        let Some(last) = list.chunks.back() else {
            return;
        };
        let should_flush = self.should_flush_chunk(last).is_some();
        if list.chunks.len() == 1 && !immediate && !should_flush {
            return;
        }

        let Some(queues) = self.flush_queues.get() else {
            return;
        };

        let from_ms = list
            .chunks
            .front()
            .and_then(|chunk| chunk.chunk.bounds())
            .map(|(from, _)| round_to_millis(from))
            .unwrap_or(0);

        let queue = &queues[flush_queue_index(stream.fingerprint(), queues.len())];
        queue.enqueue(FlushOp {
            from_ms,
            tenant: instance.tenant().clone(),
            fingerprint: stream.fingerprint(),
            immediate,
        });
    }

    pub(crate) fn should_flush_chunk(&self, chunk: &ChunkDesc) -> Option<FlushReason> {
        // The writer closes the active chunk when it cuts a new one.
        if chunk.closed {
            return Some(if chunk.synced {
                FlushReason::Synced
            } else {
                FlushReason::Full
            });
        }

        if chunk.last_updated.elapsed() > self.options.max_chunk_idle {
            return Some(FlushReason::Idle);
        }

        if let Some((from, to)) = chunk.chunk.bounds()
            && to.duration_since(from).unwrap_or_default() > self.options.max_chunk_age
        {
            return Some(FlushReason::MaxAge);
        }

        None
    }

    pub(crate) async fn flush_loop(self: Arc<Self>, idx: usize, queue: Arc<FlushQueue<FlushOp>>) {
        loop {
            let Some(mut op) = queue.dequeue().await else {
                break;
            };

            debug!(
                tenant = %op.tenant,
                fingerprint = %op.fingerprint,
                immediate = op.immediate,
                queue = idx,
                "flushing stream"
            );

            if let Err(error) = self.flush_tenant_stream(&op).await {
                error!(
                    tenant = %op.tenant,
                    fingerprint = %op.fingerprint,
                    %error,
                    "failed to flush tenant stream"
                );

                // If we're exiting and the flush failed, put the operation
                // back in the queue at a later point.
                if op.immediate {
                    op.from_ms += FLUSH_BACKOFF.as_millis() as i64;
                    queue.enqueue(op);
                }
            }
        }

        debug!(queue = idx, "flush loop exited");
    }

    async fn flush_tenant_stream(&self, op: &FlushOp) -> Result<(), FlushError> {
        let Some(instance) = self.get_instance_by_id(&op.tenant) else {
            return Ok(());
        };

        let Some((stream, chunks)) =
            self.collect_chunks_to_flush(&instance, op.fingerprint, op.immediate)
        else {
            return Ok(());
        };
        if chunks.is_empty() {
            return Ok(());
        }

        let timeout = self.options.flush_op_timeout;
        match tokio::time::timeout(timeout, self.flush_chunks(&op.tenant, &stream, &chunks)).await
        {
            Ok(result) => result,
            Err(_) => FlushTimeoutSnafu { timeout }.fail(),
        }
    }

    /// Select every flushable chunk of the stream, sealing them on the way.
    ///
    /// The reason counter is bumped once per selection, so a chunk whose
    /// persistence fails is counted again when it is re-selected.
    fn collect_chunks_to_flush(
        &self,
        instance: &TenantInstance,
        fingerprint: Fingerprint,
        immediate: bool,
    ) -> Option<(Arc<Stream>, Vec<u64>)> {
        let stream = instance.stream_by_fingerprint(fingerprint)?;

        let mut selected = Vec::new();
        {
            let mut list = stream.chunks.write();
            for chunk in list.chunks.iter_mut() {
                let reason = match (immediate, self.should_flush_chunk(chunk)) {
                    (true, _) => FlushReason::Forced,
                    (false, Some(reason)) => reason,
                    (false, None) => continue,
                };

                // Ensure no more writes happen to this chunk.
                if !chunk.closed {
                    chunk.closed = true;
                }

                // Flush this chunk only if it hasn't already been
                // successfully flushed.
                if chunk.flushed.is_none() {
                    selected.push(chunk.id);
                    self.metrics
                        .chunks_flushed_total
                        .add(1, &[KeyValue::new("reason", reason.as_str())]);
                }
            }
        }

        Some((stream, selected))
    }

    /// Persist the selected chunks of one stream.
    ///
    /// Runs in three phases: seal and encode under the chunk lock, put to
    /// the store with no lock held, then re-acquire the lock to timestamp
    /// the descriptors and record stats. The commit phase cannot fail; a
    /// failure in either earlier phase leaves `flushed` unset so the chunks
    /// are retried or re-evaluated by the next sweep.
    async fn flush_chunks(
        &self,
        tenant: &TenantName,
        stream: &Stream,
        chunk_ids: &[u64],
    ) -> Result<(), FlushError> {
        let labels = stream.labels().with_label(NAME_LABEL, LOGS_VALUE);

        let mut encoded: Vec<(u64, WireChunk)> = Vec::with_capacity(chunk_ids.len());
        {
            let mut list = stream.chunks.write();
            for &id in chunk_ids {
                let Some(desc) = list.chunk_mut(id) else {
                    continue;
                };

                // Cut any pending head block so the encoded payload is
                // complete.
                desc.chunk.close().context(EncodeSnafu)?;
                let Some((from, to)) = desc.chunk.bounds() else {
                    continue;
                };

                let mut buf = Vec::with_capacity(desc.chunk.bytes_size() + ENCODE_HEADROOM);
                let start = Instant::now();
                desc.chunk.encode_to(&mut buf).context(EncodeSnafu)?;
                self.metrics
                    .chunk_encode_time_seconds
                    .record(start.elapsed().as_secs_f64(), &[]);

                encoded.push((
                    id,
                    WireChunk::new(
                        tenant.clone(),
                        stream.fingerprint(),
                        labels.clone(),
                        from,
                        to,
                        buf.into(),
                    ),
                ));
            }
        }

        if encoded.is_empty() {
            return Ok(());
        }

        let wire_chunks: Vec<WireChunk> = encoded.iter().map(|(_, wire)| wire.clone()).collect();
        self.store.put(wire_chunks).await.context(StoreSnafu)?;

        let now = Instant::now();
        let tenant_attrs = [KeyValue::new("tenant", tenant.id().to_string())];
        let mut list = stream.chunks.write();
        for (id, wire) in encoded {
            let Some(desc) = list.chunk_mut(id) else {
                continue;
            };

            desc.flushed = Some(now);

            let compressed = wire.data.len() as f64;
            let uncompressed = desc.chunk.uncompressed_size() as f64;
            if compressed > 0.0 {
                self.metrics
                    .chunk_compression_ratio
                    .record(uncompressed / compressed, &[]);
            }
            self.metrics
                .chunk_utilization
                .record(desc.chunk.utilization(), &[]);
            self.metrics
                .chunk_entries
                .record(desc.chunk.entries() as f64, &[]);
            self.metrics.chunk_size_bytes.record(compressed, &[]);
            self.metrics
                .chunk_stored_bytes_total
                .add(wire.data.len() as u64, &tenant_attrs);
            self.metrics.chunks_stored_total.add(1, &tenant_attrs);

            if let Some((from, to)) = desc.chunk.bounds() {
                if let Ok(age) = SystemTime::now().duration_since(from) {
                    self.metrics.chunk_age_seconds.record(age.as_secs_f64(), &[]);
                }
                let lifespan = to.duration_since(from).unwrap_or_default();
                self.metrics
                    .chunk_bounds_hours
                    .record(lifespan.as_secs_f64() / 3600.0, &[]);
            }
        }

        Ok(())
    }

    /// Drop flushed chunks that have aged past the retain period, reporting
    /// the reclaimed bytes to the replay controller.
    fn remove_flushed_chunks(
        &self,
        instance: &TenantInstance,
        stream: &Stream,
        may_remove_stream: bool,
    ) {
        let now = Instant::now();
        let mut subtracted = 0usize;
        let mut removed = 0usize;

        let mut list = stream.chunks.write();
        while let Some(head) = list.chunks.front() {
            let Some(flushed) = head.flushed else {
                break;
            };
            if now.duration_since(flushed) < self.options.retain_period {
                break;
            }

            subtracted += head.chunk.uncompressed_size();
            // Dropping the descriptor releases the encoder and its buffers.
            list.chunks.pop_front();
            removed += 1;
        }
        if removed > 0 {
            self.metrics.memory_chunks.add(-(removed as i64), &[]);
        }
        let now_empty = list.chunks.is_empty();
        drop(list);

        // Signal how much data has been flushed to lessen any WAL replay
        // pressure.
        if subtracted > 0 {
            self.replay_controller().sub(subtracted);
        }

        if may_remove_stream && now_empty {
            // The stream map lock is taken before per-stream chunk locks
            // everywhere else, so the chunk lock was released above and
            // emptiness is re-checked with both held in that order.
            instance.with_streams_lock(|streams| {
                let mut list = stream.chunks.write();
                if list.chunks.is_empty() {
                    list.unlinked = true;
                    streams.remove(&stream.fingerprint());
                }
            });
        }
    }

    /// Flush every chunk and stop the workers.
    ///
    /// Sweeps all tenants with the forced flag, closes the queues, and waits
    /// for the workers to drain them. Failed forced flushes are retried from
    /// the queue until they succeed. Safe to call more than once; the second
    /// call returns once the already-stopped workers are confirmed gone.
    pub async fn flush(&self) {
        self.sweep_tenants(true, true);

        if let Some(queues) = self.flush_queues.get() {
            for queue in queues {
                queue.close();
            }
        }

        let tasks: Vec<_> = { self.flush_tasks.lock().drain(..).collect() };
        for task in tasks {
            let _ = task.await;
        }

        debug!("flush queues have drained");
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use timber_chunk::{EncoderConfig, build_chunk};
    use timber_chunk_store::MemoryChunkStore;
    use timber_resources::Entry;

    use super::*;
    use crate::config::IngesterOptions;

    fn test_op(fingerprint: u64, from_ms: i64, immediate: bool) -> FlushOp {
        FlushOp {
            from_ms,
            tenant: TenantName::new_unchecked("acme"),
            fingerprint: Fingerprint::new(fingerprint),
            immediate,
        }
    }

    #[test]
    fn test_streams_pin_to_queue_by_fingerprint() {
        for fingerprint in [10, 14, 18, 22] {
            assert_eq!(flush_queue_index(Fingerprint::new(fingerprint), 4), 2);
        }
        assert_eq!(flush_queue_index(Fingerprint::new(21), 4), 1);
    }

    #[tokio::test]
    async fn test_ops_on_one_queue_dequeue_oldest_first() {
        let queue = FlushQueue::new();
        queue.enqueue(test_op(10, 4_000, false));
        queue.enqueue(test_op(14, 1_000, false));
        queue.enqueue(test_op(18, 3_000, false));
        queue.enqueue(test_op(22, 2_000, false));

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(queue.dequeue().await.unwrap().fingerprint.as_u64());
        }
        assert_eq!(order, vec![14, 22, 18, 10]);
    }

    #[tokio::test]
    async fn test_pending_op_absorbs_same_kind_re_enqueue() {
        let queue = FlushQueue::new();
        assert!(queue.enqueue(test_op(10, 1_000, false)));
        assert!(!queue.enqueue(test_op(10, 2_000, false)));
        assert_eq!(queue.len(), 1);

        // A forced op does not collapse into the pending periodic one.
        assert!(queue.enqueue(test_op(10, 1_000, true)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_retried_op_sorts_behind_fresh_work() {
        let fresh = test_op(10, 1_000, true);
        let mut retried = test_op(14, 1_000, true);
        retried.from_ms += FLUSH_BACKOFF.as_millis() as i64;

        assert!(fresh.priority() > retried.priority());
    }

    #[test]
    fn test_flush_reason_labels() {
        assert_eq!(FlushReason::Idle.as_str(), "idle");
        assert_eq!(FlushReason::MaxAge.as_str(), "max_age");
        assert_eq!(FlushReason::Forced.as_str(), "forced");
        assert_eq!(FlushReason::Full.as_str(), "full");
        assert_eq!(FlushReason::Synced.as_str(), "synced");
    }

    fn test_ingester() -> Arc<Ingester> {
        let provider = SdkMeterProvider::builder().build();
        let meter = provider.meter("ingester");
        let options = IngesterOptions {
            max_chunk_idle: Duration::from_secs(30 * 60),
            max_chunk_age: Duration::from_secs(60 * 60),
            ..Default::default()
        };

        Ingester::new(options, Arc::new(MemoryChunkStore::new()), &meter).unwrap()
    }

    fn open_chunk(entry_offsets_secs: &[u64]) -> ChunkDesc {
        let mut chunk = build_chunk(&EncoderConfig::default());
        for &offset in entry_offsets_secs {
            chunk
                .append(&Entry::new(
                    UNIX_EPOCH + Duration::from_secs(1_700_000_000 + offset),
                    "a log line",
                ))
                .unwrap();
        }

        ChunkDesc {
            id: 0,
            chunk,
            closed: false,
            synced: false,
            last_updated: Instant::now(),
            flushed: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_decision_order() {
        let ingester = test_ingester();

        // Closed chunks flush as full, or as synced when a sync cut closed
        // them.
        let mut chunk = open_chunk(&[0]);
        chunk.closed = true;
        assert_eq!(
            ingester.should_flush_chunk(&chunk),
            Some(FlushReason::Full)
        );
        chunk.synced = true;
        assert_eq!(
            ingester.should_flush_chunk(&chunk),
            Some(FlushReason::Synced)
        );

        // Idle beats age for open chunks.
        let idle_chunk = open_chunk(&[0, 2 * 60 * 60]);
        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        assert_eq!(
            ingester.should_flush_chunk(&idle_chunk),
            Some(FlushReason::Idle)
        );

        // A freshly written chunk spanning more than the max age flushes
        // for age.
        let chunk = open_chunk(&[0, 2 * 60 * 60]);
        assert_eq!(
            ingester.should_flush_chunk(&chunk),
            Some(FlushReason::MaxAge)
        );

        // A fresh, small, open chunk stays.
        let chunk = open_chunk(&[0]);
        assert_eq!(ingester.should_flush_chunk(&chunk), None);
    }
}
