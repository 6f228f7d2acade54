use std::{
    pin::pin,
    sync::atomic::{AtomicI64, Ordering},
};

use tokio::sync::Notify;

/// Tracks the uncompressed bytes of chunk data held in memory.
///
/// WAL replay adds as it loads entries and waits while the total sits above
/// the ceiling; the reclaimer subtracts once persisted chunks age out of
/// memory, waking any waiting replayer. The counter is shared lock-free so
/// flush workers never contend with the replayer.
pub struct ReplayController {
    in_memory: AtomicI64,
    ceiling: i64,
    released: Notify,
}

impl ReplayController {
    pub fn new(ceiling: usize) -> Self {
        Self {
            in_memory: AtomicI64::new(0),
            ceiling: ceiling as i64,
            released: Notify::new(),
        }
    }

    /// Record `bytes` of payload entering memory.
    pub fn add(&self, bytes: usize) {
        self.in_memory.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    /// Record `bytes` of payload reclaimed after persistence.
    pub fn sub(&self, bytes: usize) {
        self.in_memory.fetch_sub(bytes as i64, Ordering::Relaxed);
        self.released.notify_waiters();
    }

    /// Bytes currently accounted for.
    pub fn current(&self) -> i64 {
        self.in_memory.load(Ordering::Relaxed)
    }

    /// Wait until the in-memory total drops below the ceiling.
    pub async fn wait_for_capacity(&self) {
        loop {
            let mut released = pin!(self.released.notified());
            released.as_mut().enable();

            if self.current() < self.ceiling {
                return;
            }

            released.await;
        }
    }
}
