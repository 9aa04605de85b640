// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed semaphore with fencing tokens and timeout-driven auto-release
//!
//! One `KeyedSemaphore` exists per key. Each successful acquire issues a
//! fresh lease id from a monotonic counter; the set of live ids is the
//! single source of truth for release, so a client release and the expiry
//! timer can never both decrement the holder count for the same lease.

use std::collections::HashSet;
use std::pin::pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// Errors that can occur while acquiring a lease
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// The global holder ceiling is reached; the caller is answered
    /// immediately instead of being parked.
    #[error("lock at capacity")]
    LimitExceeded,
}

struct Slots {
    held: i64,
    capacity: i64,
}

/// A counting semaphore for one key.
///
/// Lease ids start at 1 and never repeat; id 0 is reserved to mean
/// "no lease". Lock order is the slot mutex before the live-lease lock,
/// and wakeups are issued after the slot mutex is released.
pub struct KeyedSemaphore {
    key: String,
    slots: Mutex<Slots>,
    /// Broadcast target for waiters parked on a full semaphore.
    available: Notify,
    /// Fencing-token source. Kept off the slot mutex so id issuance stays
    /// race-free against releases that only hold the live-lease lock.
    next_id: AtomicI64,
    live: Mutex<HashSet<i64>>,
    /// Hard per-semaphore ceiling from the server config; 0 = unlimited.
    limit: i64,
    /// Handle for the expiry timers to release through.
    weak_self: Weak<KeyedSemaphore>,
}

impl KeyedSemaphore {
    pub fn new(key: impl Into<String>, capacity: i64, limit: i64) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            key: key.into(),
            slots: Mutex::new(Slots {
                held: 0,
                capacity: capacity.max(1),
            }),
            available: Notify::new(),
            next_id: AtomicI64::new(0),
            live: Mutex::new(HashSet::new()),
            limit,
            weak_self: weak_self.clone(),
        })
    }

    /// Acquire a lease, waiting until a slot is free.
    ///
    /// A zero `timeout` issues a lease with no auto-release; otherwise the
    /// lease self-releases after `timeout` unless released first. Only a
    /// configured global limit can make this fail.
    pub async fn acquire(&self, timeout: Duration) -> Result<i64, AcquireError> {
        let mut notified = pin!(self.available.notified());
        loop {
            // Register for a wakeup before checking the predicate so a
            // release between the check and the await cannot be missed.
            notified.as_mut().enable();
            {
                let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
                if self.limit > 0 && slots.held >= self.limit {
                    return Err(AcquireError::LimitExceeded);
                }
                if slots.held < slots.capacity {
                    slots.held += 1;
                    return Ok(self.issue(timeout));
                }
            }
            notified.as_mut().await;
            notified.set(self.available.notified());
        }
    }

    /// Acquire a lease without waiting.
    ///
    /// Returns `None` when the semaphore is full (or the global limit is
    /// reached) with no state change at all.
    pub fn try_acquire(&self, timeout: Duration) -> Option<i64> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if self.limit > 0 && slots.held >= self.limit {
            return None;
        }
        if slots.held < slots.capacity {
            slots.held += 1;
            Some(self.issue(timeout))
        } else {
            None
        }
    }

    // Issue a fresh lease id, record it live, and schedule its expiry.
    // Called with the slot mutex held so |live| tracks `held`.
    fn issue(&self, timeout: Duration) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);

        if !timeout.is_zero() {
            // The semaphore is registry-owned for the process lifetime, so
            // the upgrade only fails in teardown, where expiry is moot.
            if let Some(sem) = self.weak_self.upgrade() {
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if sem.release(id) {
                        let timeout_ms = timeout.as_millis() as u64;
                        debug!(key = %sem.key, id, timeout_ms, "lease expired");
                    }
                });
            }
        }
        id
    }

    /// Release the lease with the given id.
    ///
    /// Returns `false` for an unknown, already-released, or expired id
    /// without touching the holder count. The expiry timer calls this same
    /// path, so whichever of client and timer runs second is a no-op.
    pub fn release(&self, id: i64) -> bool {
        if !self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
        {
            return false;
        }

        let opened = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots.held > 0 {
                slots.held -= 1;
            }
            slots.held == slots.capacity - 1
        };
        // Broadcast outside the mutex so woken waiters don't immediately
        // block on it again.
        if opened {
            self.available.notify_waiters();
        }
        true
    }

    /// Change the capacity. Waiters are woken when it widens; shrinking
    /// below the current holder count is allowed and just stalls new
    /// acquires until enough leases are released.
    pub fn resize(&self, capacity: i64) {
        let capacity = capacity.max(1);
        let widened = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let widened = capacity > slots.capacity;
            slots.capacity = capacity;
            widened
        };
        if widened {
            self.available.notify_waiters();
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn held(&self) -> i64 {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).held
    }

    pub fn capacity(&self) -> i64 {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .capacity
    }

    /// Number of leases that are still valid to release.
    pub fn live_leases(&self) -> usize {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
#[path = "semaphore_tests.rs"]
mod tests;
