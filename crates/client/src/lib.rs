// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! latch-client: Sharded client for a fleet of latchd servers
//!
//! Routes each key to one server with consistent hashing, pools
//! authenticated connections per endpoint, and fails over when a server
//! disappears: the endpoint leaves the ring, its pool is dropped, and a
//! background probe re-admits it once it answers again.

mod connection;
mod pool;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use latch_core::protocol::{code, ProtocolError, Request, Response};
use latch_core::HashRing;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::pool::Pool;

pub use crate::connection::Credentials;

/// Default idle connections kept per endpoint
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default interval for re-probing endpoints that left the ring
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(60);

/// Client errors, tagged so callers can pattern-match the retry policy:
/// connection losses are retried on another endpoint for `lock`, capacity
/// and server answers always surface.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("lock at capacity: {0}")]
    Capacity(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    #[error("no endpoints available")]
    NoEndpoints,

    #[error("authentication failed")]
    AuthFailed,
}

impl ClientError {
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }

    fn from_response(response: Response) -> Self {
        match response {
            Response::Error {
                code: code::AT_CAPACITY,
                message,
            } => ClientError::Capacity(message),
            Response::Error { code, message } => ClientError::Server { code, message },
            other => ClientError::Protocol(format!("unexpected response: {:?}", other)),
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(_) | ProtocolError::ConnectionClosed => {
                ClientError::Connection(e.to_string())
            }
            ProtocolError::Json(_) | ProtocolError::MessageTooLarge(_) => {
                ClientError::Protocol(e.to_string())
            }
        }
    }
}

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The configured fleet; the ring holds the currently reachable subset
    pub endpoints: Vec<String>,
    pub pool_size: usize,
    pub credentials: Option<Credentials>,
    pub probe_interval: Duration,
}

impl ClientConfig {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            pool_size: DEFAULT_POOL_SIZE,
            credentials: None,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }
}

/// Sharded lock client
pub struct Client {
    config: ClientConfig,
    ring: RwLock<HashRing>,
    pools: RwLock<HashMap<String, Arc<Pool<Connection>>>>,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Build a client for a fleet. Unreachable endpoints are skipped with a
    /// warning; the liveness probe re-admits them once they answer.
    pub async fn connect(config: ClientConfig) -> Arc<Self> {
        let client = Arc::new(Self {
            ring: RwLock::new(HashRing::new()),
            pools: RwLock::new(HashMap::new()),
            probe: Mutex::new(None),
            config,
        });

        for endpoint in client.config.endpoints.clone() {
            match Connection::dial(&endpoint, client.config.credentials.as_ref()).await {
                Ok(conn) => {
                    client.admit(&endpoint);
                    client.release_connection_quiet(conn);
                    info!(endpoint = %endpoint, "added endpoint");
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, "could not connect, endpoint not added: {}", e);
                }
            }
        }

        let handle = tokio::spawn(probe_loop(
            Arc::downgrade(&client),
            client.config.probe_interval,
        ));
        *client.probe.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        client
    }

    /// Acquire a lease on `key` with the default capacity of one.
    pub async fn lock(&self, key: &str, timeout: Duration) -> Result<i64, ClientError> {
        self.lock_sized(key, 1, timeout).await
    }

    /// Acquire a lease on `key`, setting the key's semaphore capacity.
    ///
    /// On a connection failure the endpoint is dropped from the ring and
    /// the request is re-routed from the top; the ring then owns the key
    /// elsewhere. Capacity (503) and other server answers are never
    /// retried.
    pub async fn lock_sized(
        &self,
        key: &str,
        capacity: i64,
        timeout: Duration,
    ) -> Result<i64, ClientError> {
        let request = Request::Lock {
            key: key.to_string(),
            capacity,
            timeout_ms: timeout.as_millis() as u64,
        };

        loop {
            let endpoint = self.route(key).ok_or(ClientError::NoEndpoints)?;
            let mut conn = match self.get_connection(&endpoint).await {
                Ok(conn) => conn,
                Err(e) if e.is_connection() => {
                    warn!(endpoint = %endpoint, "connection failed, removing endpoint: {}", e);
                    self.remove_endpoint(&endpoint);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match conn.request(&request).await {
                Ok(Response::Locked { id }) => {
                    self.release_connection(conn);
                    return Ok(id);
                }
                Ok(response) => {
                    self.release_connection(conn);
                    return Err(ClientError::from_response(response));
                }
                Err(e) if e.is_connection() => {
                    warn!(endpoint = %endpoint, "connection lost, removing endpoint and retrying: {}", e);
                    self.discard_connection(conn);
                    self.remove_endpoint(&endpoint);
                    continue;
                }
                Err(e) => {
                    self.discard_connection(conn);
                    return Err(e);
                }
            }
        }
    }

    /// Release a lease. `Ok(false)` means the lease was already gone
    /// (released or expired), which is a normal outcome.
    ///
    /// Connection errors are surfaced, never retried: the lock lived on the
    /// failed server, and a retry would land on a different endpoint that
    /// has never heard of it. The lease dies with the server.
    pub async fn unlock(&self, key: &str, id: i64) -> Result<bool, ClientError> {
        let endpoint = self.route(key).ok_or(ClientError::NoEndpoints)?;
        let mut conn = self.get_connection(&endpoint).await?;

        let request = Request::Unlock {
            key: key.to_string(),
            id,
        };
        match conn.request(&request).await {
            Ok(Response::Unlocked) => {
                self.release_connection(conn);
                Ok(true)
            }
            Ok(Response::NotUnlocked) => {
                self.release_connection(conn);
                Ok(false)
            }
            Ok(response) => {
                self.release_connection(conn);
                Err(ClientError::from_response(response))
            }
            Err(e) => {
                self.discard_connection(conn);
                Err(e)
            }
        }
    }

    /// PING one endpoint over a fresh connection.
    pub async fn ping(&self, endpoint: &str) -> Result<(), ClientError> {
        let mut conn = Connection::dial(endpoint, self.config.credentials.as_ref()).await?;
        match conn.request(&Request::Ping).await? {
            Response::Pong => Ok(()),
            response => Err(ClientError::from_response(response)),
        }
    }

    /// Endpoints currently in the ring.
    pub fn live_endpoints(&self) -> Vec<String> {
        self.ring
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .members()
            .map(String::from)
            .collect()
    }

    /// Idle connections across all pools.
    pub fn pooled_connections(&self) -> usize {
        self.pools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|pool| pool.idle_count())
            .sum()
    }

    fn route(&self, key: &str) -> Option<String> {
        self.ring
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .route(key)
            .map(String::from)
    }

    fn admit(&self, endpoint: &str) {
        self.pools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Pool::new(self.config.pool_size)));
        self.ring
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add(endpoint);
    }

    /// Drop an endpoint from the ring and close its pooled connections.
    fn remove_endpoint(&self, endpoint: &str) {
        self.ring
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(endpoint);
        self.pools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(endpoint);
    }

    async fn get_connection(&self, endpoint: &str) -> Result<Connection, ClientError> {
        let pool = self
            .pools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(endpoint)
            .cloned();
        let Some(pool) = pool else {
            return Err(ClientError::Connection(format!(
                "endpoint {} has no pool",
                endpoint
            )));
        };

        if let Some(conn) = pool.checkout() {
            pool.borrowed();
            return Ok(conn);
        }

        debug!(endpoint = %endpoint, "pool empty, dialing new connection");
        let conn = Connection::dial(endpoint, self.config.credentials.as_ref()).await?;
        pool.borrowed();
        Ok(conn)
    }

    fn release_connection(&self, conn: Connection) {
        if let Some(pool) = self
            .pools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(conn.endpoint())
            .cloned()
        {
            pool.returned();
            pool.checkin(conn);
        }
        // Endpoint gone: the connection is closed by dropping it.
    }

    // Checkin for the warm connection made before the gauge counts it.
    fn release_connection_quiet(&self, conn: Connection) {
        if let Some(pool) = self
            .pools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(conn.endpoint())
            .cloned()
        {
            pool.checkin(conn);
        }
    }

    // Close a broken connection without pooling it.
    fn discard_connection(&self, conn: Connection) {
        if let Some(pool) = self
            .pools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(conn.endpoint())
            .cloned()
        {
            pool.returned();
        }
        drop(conn);
    }

    /// Dial configured endpoints that are missing from the ring and
    /// re-admit the ones that answer. Pure liveness check; the probe
    /// connection is never retained.
    async fn probe_down_endpoints(&self) {
        let down: Vec<String> = {
            let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
            self.config
                .endpoints
                .iter()
                .filter(|endpoint| !ring.contains(endpoint.as_str()))
                .cloned()
                .collect()
        };

        for endpoint in down {
            match TcpStream::connect(&endpoint).await {
                Ok(_) => {
                    info!(endpoint = %endpoint, "endpoint recovered, re-adding");
                    self.admit(&endpoint);
                }
                Err(e) => {
                    debug!(endpoint = %endpoint, "endpoint still down: {}", e);
                }
            }
        }
        debug!(
            live = self.live_endpoints().len(),
            pooled = self.pooled_connections(),
            "endpoint probe finished"
        );
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(handle) = self.probe.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

async fn probe_loop(client: Weak<Client>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; connect() just dialed everyone.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(client) = client.upgrade() else {
            return;
        };
        client.probe_down_endpoints().await;
    }
}
