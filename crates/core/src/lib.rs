// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! latch-core: Core library for the latch lock service
//!
//! Holds the keyed semaphore engine, the key registry, the wire protocol,
//! the challenge-response auth primitives, and the consistent-hash ring
//! shared by the daemon and the client.

pub mod auth;
pub mod protocol;
pub mod registry;
pub mod ring;
pub mod semaphore;

pub use registry::SemaphoreRegistry;
pub use ring::HashRing;
pub use semaphore::{AcquireError, KeyedSemaphore};
