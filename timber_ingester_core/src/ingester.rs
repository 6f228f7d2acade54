use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use parking_lot::{Mutex, RwLock};
use timber_chunk_store::ChunkStore;
use timber_observability::Meter;
use timber_resources::{Entry, LabelSet, TenantName};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{IngesterOptions, OptionsError},
    error::PushError,
    flush::FlushOp,
    instance::TenantInstance,
    metrics::FlushMetrics,
    queue::FlushQueue,
    replay::ReplayController,
    stream::Stream,
};

/// The ingester: buffers appended entries as per-stream chunks and flushes
/// sealed chunks to the chunk store in the background.
///
/// Writers call [`push`](Ingester::push); the sweeper and flush workers are
/// started by [`init_flush_queues`](Ingester::init_flush_queues) (or
/// [`run`](Ingester::run), which also drives the periodic sweep) and drain
/// chunks to the store until [`flush`](Ingester::flush) shuts them down.
pub struct Ingester {
    pub(crate) options: IngesterOptions,
    pub(crate) store: Arc<dyn ChunkStore>,
    pub(crate) metrics: FlushMetrics,
    replay: Arc<ReplayController>,
    instances: RwLock<HashMap<TenantName, Arc<TenantInstance>>>,
    pub(crate) flush_queues: OnceLock<Vec<Arc<FlushQueue<FlushOp>>>>,
    pub(crate) flush_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Ingester {
    pub fn new(
        options: IngesterOptions,
        store: Arc<dyn ChunkStore>,
        meter: &Meter,
    ) -> Result<Arc<Self>, OptionsError> {
        options.validate()?;

        let metrics = FlushMetrics::new(meter);
        let replay = Arc::new(ReplayController::new(options.replay_memory_ceiling));

        Ok(Arc::new(Self {
            options,
            store,
            metrics,
            replay,
            instances: RwLock::new(HashMap::new()),
            flush_queues: OnceLock::new(),
            flush_tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn options(&self) -> &IngesterOptions {
        &self.options
    }

    /// The memory-pressure counter shared with WAL replay.
    pub fn replay_controller(&self) -> &Arc<ReplayController> {
        &self.replay
    }

    /// Append `entries` to the stream identified by `labels`, creating the
    /// tenant instance and stream on first use.
    pub fn push(
        &self,
        tenant: &TenantName,
        labels: LabelSet,
        entries: &[Entry],
    ) -> Result<(), PushError> {
        let instance = self.get_or_create_instance(tenant);

        loop {
            let stream = instance.get_or_create_stream(labels.clone(), |labels| {
                Stream::new(
                    labels,
                    &self.options,
                    self.metrics.clone(),
                    self.replay.clone(),
                )
            });

            match stream.push(entries) {
                // The reclaimer unlinked this stream after we looked it up;
                // the next lookup creates a fresh one.
                Err(PushError::StreamUnlinked) => continue,
                result => return result,
            }
        }
    }

    pub fn get_instances(&self) -> Vec<Arc<TenantInstance>> {
        self.instances.read().values().cloned().collect()
    }

    pub fn get_instance_by_id(&self, tenant: &TenantName) -> Option<Arc<TenantInstance>> {
        self.instances.read().get(tenant).cloned()
    }

    fn get_or_create_instance(&self, tenant: &TenantName) -> Arc<TenantInstance> {
        if let Some(instance) = self.instances.read().get(tenant) {
            return instance.clone();
        }

        let mut instances = self.instances.write();
        instances
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(TenantInstance::new(tenant.clone())))
            .clone()
    }

    /// Create the flush queues and start one worker per queue.
    ///
    /// Idempotent: WAL replay may call this any number of times before the
    /// periodic loop starts, and every call after the first reuses the same
    /// pool.
    pub fn init_flush_queues(self: &Arc<Self>) {
        self.flush_queues.get_or_init(|| {
            let queues: Vec<_> = (0..self.options.concurrent_flushes)
                .map(|_| Arc::new(FlushQueue::new()))
                .collect();

            let mut tasks = self.flush_tasks.lock();
            for (idx, queue) in queues.iter().enumerate() {
                tasks.push(tokio::spawn(self.clone().flush_loop(idx, queue.clone())));
            }

            queues
        });
    }

    /// Sweep periodically until cancelled, then drain with
    /// [`flush`](Ingester::flush).
    pub async fn run(self: Arc<Self>, ct: CancellationToken) {
        self.init_flush_queues();

        let mut ticker = tokio::time::interval(self.options.flush_check_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_tenants(false, true);
                }
            }
        }

        self.flush().await;
    }
}
