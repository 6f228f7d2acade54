use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use timber_resources::{Fingerprint, LabelSet, TenantName};

/// A sealed chunk in its storage representation.
#[derive(Debug, Clone)]
pub struct WireChunk {
    pub tenant: TenantName,
    pub fingerprint: Fingerprint,
    pub labels: LabelSet,
    /// Timestamp of the first entry, rounded to milliseconds.
    pub from_ms: i64,
    /// Timestamp of the last entry, rounded to milliseconds.
    pub through_ms: i64,
    /// The encoded chunk payload.
    pub data: Bytes,
    /// CRC32 of `data`.
    pub checksum: u32,
}

impl WireChunk {
    pub fn new(
        tenant: TenantName,
        fingerprint: Fingerprint,
        labels: LabelSet,
        from: SystemTime,
        through: SystemTime,
        data: Bytes,
    ) -> Self {
        let checksum = crc32fast::hash(&data);
        Self {
            tenant,
            fingerprint,
            labels,
            from_ms: round_to_millis(from),
            through_ms: round_to_millis(through),
            data,
            checksum,
        }
    }

    /// The storage key identifying this chunk.
    ///
    /// Two chunks with the same tenant, fingerprint, bounds, and payload get
    /// the same key, which is what makes retried puts idempotent.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}-{}-{:08x}",
            self.tenant, self.fingerprint, self.from_ms, self.through_ms, self.checksum
        )
    }
}

/// Round a timestamp down to whole milliseconds since the epoch.
pub fn round_to_millis(ts: SystemTime) -> i64 {
    ts.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
