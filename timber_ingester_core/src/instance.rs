use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use timber_resources::{Fingerprint, LabelSet, TenantName};

use crate::stream::Stream;

/// Per-tenant container of streams, keyed by label-set fingerprint.
///
/// The stream map lock is always taken before any per-stream chunk lock;
/// stream removal re-checks emptiness after re-acquiring in that order.
pub struct TenantInstance {
    tenant: TenantName,
    streams: RwLock<HashMap<Fingerprint, Arc<Stream>>>,
}

impl TenantInstance {
    pub(crate) fn new(tenant: TenantName) -> Self {
        Self {
            tenant,
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub fn tenant(&self) -> &TenantName {
        &self.tenant
    }

    pub fn stream_by_fingerprint(&self, fingerprint: Fingerprint) -> Option<Arc<Stream>> {
        self.streams.read().get(&fingerprint).cloned()
    }

    /// Snapshot of all streams, so callers can iterate without holding the
    /// stream map lock.
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.read().values().cloned().collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    pub(crate) fn get_or_create_stream(
        &self,
        labels: LabelSet,
        make: impl FnOnce(LabelSet) -> Stream,
    ) -> Arc<Stream> {
        let fingerprint = labels.fingerprint();

        if let Some(stream) = self.streams.read().get(&fingerprint) {
            return stream.clone();
        }

        let mut streams = self.streams.write();
        streams
            .entry(fingerprint)
            .or_insert_with(|| Arc::new(make(labels)))
            .clone()
    }

    /// Run `f` with the stream map exclusively locked.
    pub(crate) fn with_streams_lock<R>(
        &self,
        f: impl FnOnce(&mut HashMap<Fingerprint, Arc<Stream>>) -> R,
    ) -> R {
        let mut streams = self.streams.write();
        f(&mut streams)
    }
}
