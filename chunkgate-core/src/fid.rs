//! File-id leasing: a window of ids leased from the master, handed out
//! strictly increasing, with single-flight refills that park concurrent
//! callers instead of stampeding the master.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use crate::error::RouterError;

/// Remaining-id threshold below which the cache asks for a fresh lease.
const LOW_WATER: u64 = 64;

/// A half-open id range leased from the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FidRange {
    /// First id in the lease.
    pub start: u64,
    /// One past the last id in the lease.
    pub end: u64,
}

#[derive(Debug)]
struct FidWindow {
    cursor: u64,
    end: u64,
}

#[derive(Debug, Clone)]
struct RefillSignal {
    epoch: u64,
    error: Option<String>,
}

/// Clears the refill-in-progress flag when the winning refill exits,
/// successfully or not.
pub struct RefillGuard<'a> {
    cache: &'a FidCache,
}

impl Drop for RefillGuard<'_> {
    fn drop(&mut self) {
        self.cache.refilling.store(false, Ordering::Release);
    }
}

/// The leased id window plus the coordination state for refills.
///
/// Ids are strictly increasing within one process; `merge` refuses windows
/// that would move the cursor backwards, so a stale master response cannot
/// cause reissue.
pub struct FidCache {
    window: Mutex<FidWindow>,
    refilling: AtomicBool,
    signal: watch::Sender<RefillSignal>,
}

impl Default for FidCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FidCache {
    /// Creates an empty cache; the first `try_next` fails until a lease is
    /// merged in.
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(RefillSignal {
            epoch: 0,
            error: None,
        });
        Self {
            window: Mutex::new(FidWindow { cursor: 0, end: 0 }),
            refilling: AtomicBool::new(false),
            signal,
        }
    }

    /// Hands out the next id, or `None` when the window is exhausted.
    pub fn try_next(&self) -> Option<u64> {
        let mut window = self.window.lock();
        if window.cursor < window.end {
            let fid = window.cursor;
            window.cursor += 1;
            Some(fid)
        } else {
            None
        }
    }

    /// Whether the remaining ids dip below the low-water mark.
    #[must_use]
    pub fn is_shortage(&self) -> bool {
        let window = self.window.lock();
        window.end - window.cursor < LOW_WATER
    }

    /// Ids still available in the current window.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        let window = self.window.lock();
        window.end - window.cursor
    }

    /// Extends the lease with a fresh window and, when `wake` is set,
    /// releases parked waiters. Windows that do not extend the current lease
    /// are dropped so the cursor never moves backwards; the return value
    /// reports whether the lease actually grew.
    pub fn merge(&self, start: u64, end: u64, wake: bool) -> bool {
        let extended = {
            let mut window = self.window.lock();
            if end <= window.end {
                warn!(
                    start,
                    end,
                    current_end = window.end,
                    "ignoring fid window that does not extend the lease"
                );
                false
            } else {
                window.cursor = window.cursor.max(start);
                window.end = end;
                true
            }
        };
        if wake {
            self.signal.send_modify(|signal| {
                signal.epoch += 1;
                signal.error = None;
            });
        }
        extended
    }

    /// Claims the single refill slot; at most one claim is live at a time,
    /// and the returned guard frees the slot when dropped.
    pub fn begin_refill(&self) -> Option<RefillGuard<'_>> {
        if self
            .refilling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(RefillGuard { cache: self })
        } else {
            None
        }
    }

    /// Wakes every parked waiter with the refill failure.
    pub fn abort_refill(&self, message: &str) {
        let message = message.to_string();
        self.signal.send_modify(|signal| {
            signal.epoch += 1;
            signal.error = Some(message);
        });
    }

    /// Parks until a refill publishes ids (returning the next one) or aborts
    /// (returning the refill error).
    pub async fn wait_next(&self) -> Result<u64, RouterError> {
        let mut rx = self.signal.subscribe();
        loop {
            if let Some(fid) = self.try_next() {
                return Ok(fid);
            }
            if rx.changed().await.is_err() {
                return Err(RouterError::FidRefill("fid cache dropped".to_string()));
            }
            let error = rx.borrow_and_update().error.clone();
            if let Some(message) = error {
                return Err(RouterError::FidRefill(message));
            }
        }
    }
}
