// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection handling and request dispatch.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use latch_core::protocol::{self, ProtocolError, Request, Response};
use latch_core::semaphore::AcquireError;
use latch_core::{auth, SemaphoreRegistry};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::config::ServerConfig;

/// Shared server state
pub struct ServerState {
    pub registry: SemaphoreRegistry,
    pub config: ServerConfig,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            registry: SemaphoreRegistry::new(config.lock_limit),
            config,
        }
    }
}

/// Per-connection authentication state
struct ConnState {
    auth_required: bool,
    authenticated: bool,
    /// Challenge issued to this connection, generated on first AUTH
    challenge: Option<String>,
}

impl ConnState {
    fn new(auth_required: bool) -> Self {
        Self {
            auth_required,
            authenticated: false,
            challenge: None,
        }
    }
}

/// Spawn a task serving one accepted connection.
///
/// A second task supervises it so a panic in dispatch is logged and
/// confined to that connection while the server keeps accepting.
pub fn spawn_connection(state: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
    let task = tokio::spawn(async move { handle_connection(&state, stream).await });
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => debug!(%peer, "connection closed"),
            Ok(Err(e)) => warn!(%peer, "connection ended: {}", e),
            Err(e) if e.is_panic() => error!(%peer, "recovered from panic in connection: {}", e),
            Err(_) => {}
        }
    });
}

/// Serve one connection: read framed requests in order, answer each with
/// exactly one framed response, until end-of-stream or a framing error.
pub async fn handle_connection<S>(state: &ServerState, stream: S) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut conn = ConnState::new(state.config.auth_enabled());

    loop {
        let frame = match protocol::read_message(&mut reader).await {
            Ok(frame) => frame,
            Err(ProtocolError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        // A malformed request inside a well-delimited frame gets a 400 and
        // the connection keeps going; only framing errors close it.
        let response = match protocol::decode::<Request>(&frame) {
            Ok(request) => dispatch(state, &mut conn, request).await,
            Err(_) => Response::bad_format(),
        };

        let data = protocol::encode(&response)?;
        protocol::write_message(&mut writer, &data).await?;
    }
}

async fn dispatch(state: &ServerState, conn: &mut ConnState, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong,
        Request::Auth { username, proof } => handle_auth(state, conn, &username, proof),
        _ if conn.auth_required && !conn.authenticated => Response::unauthorized(),
        Request::Lock {
            key,
            capacity,
            timeout_ms,
        } => handle_lock(state, &key, capacity, timeout_ms).await,
        Request::Unlock { key, id } => handle_unlock(state, &key, id),
        Request::Unknown => Response::unknown_command(),
    }
}

fn handle_auth(
    state: &ServerState,
    conn: &mut ConnState,
    username: &str,
    proof: Option<String>,
) -> Response {
    if !conn.auth_required {
        return Response::Authorized;
    }

    let Some(password) = state.config.authentication.get(username) else {
        warn!(username, "unauthorized: unknown user");
        return Response::unauthorized();
    };

    match proof {
        None => {
            let nonce = conn
                .challenge
                .get_or_insert_with(auth::generate_challenge)
                .clone();
            Response::Challenge { nonce }
        }
        Some(proof) => match &conn.challenge {
            Some(nonce) if auth::verify_proof(password, nonce, &proof) => {
                debug!(username, "authorized");
                conn.authenticated = true;
                Response::Authorized
            }
            _ => {
                warn!(username, "unauthorized: bad proof");
                Response::unauthorized()
            }
        },
    }
}

async fn handle_lock(state: &ServerState, key: &str, capacity: i64, timeout_ms: u64) -> Response {
    if key.is_empty() {
        return Response::bad_format();
    }
    let capacity = if capacity <= 0 { 1 } else { capacity };
    let timeout = Duration::from_millis(state.config.clamp_timeout(timeout_ms));

    let sem = state.registry.get_or_create(key, capacity);
    match sem.acquire(timeout).await {
        Ok(id) => {
            debug!(key, id, timeout_ms, "locked");
            Response::Locked { id }
        }
        Err(AcquireError::LimitExceeded) => {
            debug!(key, "lock at capacity");
            Response::at_capacity()
        }
    }
}

fn handle_unlock(state: &ServerState, key: &str, id: i64) -> Response {
    if key.is_empty() || id <= 0 {
        return Response::bad_format();
    }

    let Some(sem) = state.registry.get(key) else {
        debug!(key, id, "lock not found");
        return Response::lock_not_found();
    };

    if sem.release(id) {
        debug!(key, id, "unlocked");
        Response::Unlocked
    } else {
        debug!(key, id, "not unlocked");
        Response::NotUnlocked
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
