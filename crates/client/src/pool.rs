// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded idle-connection pool for one endpoint
//!
//! Checkout and checkin are both non-blocking: an empty pool tells the
//! caller to dial a fresh connection, and a full pool closes the returned
//! one by dropping it. A blocking pool could deadlock callers that hold
//! one lock while acquiring another.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

pub(crate) struct Pool<T> {
    idle: Mutex<VecDeque<T>>,
    capacity: usize,
    /// Connections currently checked out, for observability only.
    in_flight: AtomicI64,
}

impl<T> Pool<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            in_flight: AtomicI64::new(0),
        }
    }

    /// Take an idle connection if one is available.
    pub(crate) fn checkout(&self) -> Option<T> {
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Return a connection; reports `false` when the pool was full and the
    /// connection was dropped instead.
    pub(crate) fn checkin(&self, item: T) -> bool {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.capacity {
            idle.push_back(item);
            true
        } else {
            false
        }
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn borrowed(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn returned(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
