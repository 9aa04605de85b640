// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for client/daemon communication
//!
//! Messages are framed as a 4-byte big-endian length prefix followed by a
//! JSON object. Requests are tagged with `command`, responses with
//! `status`; every response maps to a numeric status code kept stable for
//! compatibility.

use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum size of a single framed message
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Response status codes
pub mod code {
    pub const OK: u16 = 200;
    pub const NOT_UNLOCKED: u16 = 204;
    pub const BAD_FORMAT: u16 = 400;
    pub const UNAUTHORIZED: u16 = 403;
    pub const LOCK_NOT_FOUND: u16 = 404;
    pub const UNKNOWN_COMMAND: u16 = 405;
    pub const INTERNAL: u16 = 500;
    pub const AT_CAPACITY: u16 = 503;
}

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Requests sent from client to daemon.
///
/// A request whose command is not recognized decodes to `Unknown` so the
/// daemon can answer 405 instead of treating it as a framing error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    Ping,
    /// First round carries no proof and is answered with a challenge;
    /// the second round carries the HMAC proof of the password.
    Auth {
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proof: Option<String>,
    },
    Lock {
        key: String,
        /// Semaphore capacity; absent or zero means 1.
        #[serde(default)]
        capacity: i64,
        /// Auto-release timeout; absent or zero means hold forever.
        #[serde(default)]
        timeout_ms: u64,
    },
    Unlock {
        key: String,
        id: i64,
    },
    #[serde(other)]
    Unknown,
}

/// Responses sent from daemon to client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Challenge { nonce: String },
    Authorized,
    Locked { id: i64 },
    Unlocked,
    NotUnlocked,
    Error { code: u16, message: String },
}

impl Response {
    /// Numeric status code for this response.
    pub fn code(&self) -> u16 {
        match self {
            Response::NotUnlocked => code::NOT_UNLOCKED,
            Response::Error { code, .. } => *code,
            _ => code::OK,
        }
    }

    pub fn bad_format() -> Self {
        Self::error(code::BAD_FORMAT, "bad command format")
    }

    pub fn unauthorized() -> Self {
        Self::error(code::UNAUTHORIZED, "unauthorized")
    }

    pub fn lock_not_found() -> Self {
        Self::error(code::LOCK_NOT_FOUND, "lock not found")
    }

    pub fn unknown_command() -> Self {
        Self::error(code::UNKNOWN_COMMAND, "unknown command")
    }

    pub fn at_capacity() -> Self {
        Self::error(code::AT_CAPACITY, "lock at capacity")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Error {
            code: code::INTERNAL,
            message: message.into(),
        }
    }

    fn error(code: u16, message: &str) -> Self {
        Self::Error {
            code,
            message: message.to_string(),
        }
    }
}

/// Encode a message as JSON bytes (no length prefix)
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a message from JSON bytes
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

/// Read one length-prefixed message
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(len));
    }

    let mut data = vec![0u8; len];
    match reader.read_exact(&mut data).await {
        Ok(_) => Ok(data),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProtocolError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

/// Write one message with its length prefix
pub async fn write_message<W>(writer: &mut W, data: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
