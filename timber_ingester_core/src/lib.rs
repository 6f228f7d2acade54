//! The ingester core: buffering, sweeping, and flushing of log streams.
//!
//! Writers append entries into the open tail chunk of their stream. A
//! periodic sweeper visits every stream, decides which chunks should flush,
//! and schedules work onto per-worker priority queues sharded by stream
//! fingerprint. Workers seal, encode, and persist the selected chunks; the
//! reclaimer drops persisted chunks once they age past retention and feeds
//! the reclaimed bytes back to the WAL replay controller.

pub mod config;
pub mod error;
pub mod flush;
pub mod ingester;
pub mod instance;
pub mod metrics;
pub mod queue;
pub mod replay;
pub mod stream;

pub use self::{
    config::{IngesterOptions, OptionsError},
    error::{FlushError, PushError},
    flush::{FlushOp, FlushReason},
    ingester::Ingester,
    instance::TenantInstance,
    metrics::FlushMetrics,
    queue::{FlushQueue, QueueItem},
    replay::ReplayController,
    stream::Stream,
};
