// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consistent-hash ring over server endpoints
//!
//! Virtual-node hashing: each endpoint owns several points on a u64 ring
//! and a key routes to the first point at or after its own hash. The hash
//! is a SHA-256 prefix, so every client instance maps the same key to the
//! same endpoint.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

/// Virtual nodes per endpoint
pub const DEFAULT_REPLICAS: usize = 20;

#[derive(Clone, Debug)]
pub struct HashRing {
    replicas: usize,
    ring: BTreeMap<u64, String>,
    members: BTreeSet<String>,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl HashRing {
    pub fn new() -> Self {
        Self::with_replicas(DEFAULT_REPLICAS)
    }

    pub fn with_replicas(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            ring: BTreeMap::new(),
            members: BTreeSet::new(),
        }
    }

    /// Add an endpoint's virtual nodes. Adding twice is a no-op.
    pub fn add(&mut self, endpoint: &str) {
        if !self.members.insert(endpoint.to_string()) {
            return;
        }
        for replica in 0..self.replicas {
            self.ring
                .insert(hash_point(endpoint, replica), endpoint.to_string());
        }
    }

    /// Remove an endpoint and all of its virtual nodes.
    pub fn remove(&mut self, endpoint: &str) {
        if !self.members.remove(endpoint) {
            return;
        }
        for replica in 0..self.replicas {
            self.ring.remove(&hash_point(endpoint, replica));
        }
    }

    /// Endpoint owning `key`, or `None` when the ring is empty.
    pub fn route(&self, key: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let point = hash_key(key);
        self.ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, endpoint)| endpoint.as_str())
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.members.contains(endpoint)
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

fn hash_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

fn hash_point(endpoint: &str, replica: usize) -> u64 {
    hash_key(&format!("{}#{}", endpoint, replica))
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
