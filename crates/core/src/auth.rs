// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Challenge-response authentication primitives
//!
//! The daemon sends a random 24-byte challenge (base64); the client answers
//! with `HMAC-SHA256(key = challenge, message = password)`, also base64.
//! Verification is constant-time via the MAC itself, so a password never
//! crosses the wire.

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of the random challenge in raw bytes
pub const CHALLENGE_LEN: usize = 24;

/// Errors from proof construction
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Generate a fresh base64-encoded challenge nonce.
pub fn generate_challenge() -> String {
    let mut nonce = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    general_purpose::STANDARD.encode(nonce)
}

/// Compute the base64 proof for a password against a challenge.
pub fn compute_proof(password: &str, challenge: &str) -> Result<String, AuthError> {
    let nonce = general_purpose::STANDARD.decode(challenge)?;
    // HMAC-SHA256 accepts keys of any length per RFC 2104.
    let mut mac = HmacSha256::new_from_slice(&nonce).expect("HMAC accepts any key size");
    mac.update(password.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verify a client's proof against the expected password and challenge.
///
/// Returns `false` for malformed base64 as well as a wrong MAC; the caller
/// only needs pass/fail. Comparison is constant-time.
pub fn verify_proof(password: &str, challenge: &str, proof: &str) -> bool {
    let Ok(nonce) = general_purpose::STANDARD.decode(challenge) else {
        return false;
    };
    let Ok(proof) = general_purpose::STANDARD.decode(proof) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(&nonce).expect("HMAC accepts any key size");
    mac.update(password.as_bytes());
    mac.verify_slice(&proof).is_ok()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
