//! Single-flight guard for reconciliation passes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Allows at most one pass at a time. Attempts made while a pass is
/// running are rejected and counted, never queued.
#[derive(Debug, Default)]
pub struct SyncGuard {
    running: AtomicBool,
    rejected: AtomicU64,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard, or `None` if a pass is already running.
    pub fn try_acquire(&self) -> Option<SyncPermit<'_>> {
        match self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(SyncPermit { guard: self }),
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Held for the duration of a pass; releases the guard when dropped.
#[derive(Debug)]
pub struct SyncPermit<'a> {
    guard: &'a SyncGuard,
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}
