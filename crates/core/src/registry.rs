// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-to-semaphore registry with lazy creation
//!
//! Semaphores are created on first reference to a key and live for the
//! process lifetime. Reusing a key updates the capacity (last writer wins).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::semaphore::KeyedSemaphore;

/// Maps keys to their semaphores.
pub struct SemaphoreRegistry {
    semaphores: RwLock<HashMap<String, Arc<KeyedSemaphore>>>,
    /// Global per-semaphore holder ceiling applied to every entry; 0 = none.
    lock_limit: i64,
}

impl SemaphoreRegistry {
    pub fn new(lock_limit: i64) -> Self {
        Self {
            semaphores: RwLock::new(HashMap::new()),
            lock_limit,
        }
    }

    /// Look up the semaphore for `key`, creating it with `capacity` on the
    /// first reference. An existing semaphore is resized to `capacity`.
    pub fn get_or_create(&self, key: &str, capacity: i64) -> Arc<KeyedSemaphore> {
        // Most keys already exist, so try under the read lock first.
        if let Some(sem) = self.get(key) {
            sem.resize(capacity);
            return sem;
        }

        let mut semaphores = self.semaphores.write().unwrap_or_else(|e| e.into_inner());
        // Re-check: someone may have created it between the locks.
        if let Some(sem) = semaphores.get(key) {
            sem.resize(capacity);
            return Arc::clone(sem);
        }
        let sem = KeyedSemaphore::new(key, capacity, self.lock_limit);
        semaphores.insert(key.to_string(), Arc::clone(&sem));
        sem
    }

    /// Read-only lookup; `None` when the key has never been locked.
    pub fn get(&self, key: &str) -> Option<Arc<KeyedSemaphore>> {
        self.semaphores
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.semaphores
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
