use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_s(&self) -> Result<u64>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_s(&self) -> Result<u64> {
        Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
    }
}

/// Settable clock for replays and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_s: u64) -> Self {
        Self {
            now: AtomicU64::new(start_s),
        }
    }

    pub fn set(&self, now_s: u64) {
        self.now.store(now_s, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_s(&self) -> Result<u64> {
        Ok(self.now.load(Ordering::SeqCst))
    }
}
