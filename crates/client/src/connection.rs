// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single authenticated connection to one endpoint.

use latch_core::auth;
use latch_core::protocol::{self, Request, Response};
use tokio::net::TcpStream;
use tracing::debug;

use crate::ClientError;

/// Username and password for an authenticated fleet
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Write attempts before a send is surfaced as a connection error
const WRITE_ATTEMPTS: u32 = 3;

pub(crate) struct Connection {
    endpoint: String,
    stream: TcpStream,
    credentials: Option<Credentials>,
}

impl Connection {
    /// Dial an endpoint and run the auth handshake when credentials are
    /// configured.
    pub(crate) async fn dial(
        endpoint: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| ClientError::Connection(format!("dial {}: {}", endpoint, e)))?;
        let mut conn = Self {
            endpoint: endpoint.to_string(),
            stream,
            credentials: credentials.cloned(),
        };
        if let Some(credentials) = conn.credentials.clone() {
            conn.authenticate(&credentials).await?;
        }
        Ok(conn)
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request and read its response.
    ///
    /// A failed write is retried on a freshly dialed connection, up to
    /// three attempts. A failed read surfaces immediately: the request may
    /// already have been dispatched, so reads have no safe retry.
    pub(crate) async fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        let data = protocol::encode(request)?;

        let mut attempt = 1;
        loop {
            match protocol::write_message(&mut self.stream, &data).await {
                Ok(()) => break,
                Err(e) if attempt >= WRITE_ATTEMPTS => return Err(e.into()),
                Err(e) => {
                    debug!(endpoint = %self.endpoint, attempt, "write failed, redialing: {}", e);
                    attempt += 1;
                    if let Err(redial) = self.redial().await {
                        debug!(endpoint = %self.endpoint, "redial failed: {}", redial);
                    }
                }
            }
        }

        let frame = protocol::read_message(&mut self.stream).await?;
        Ok(protocol::decode(&frame)?)
    }

    async fn redial(&mut self) -> Result<(), ClientError> {
        let fresh = Self::dial(&self.endpoint, self.credentials.as_ref()).await?;
        self.stream = fresh.stream;
        Ok(())
    }

    // Challenge-response handshake: AUTH user -> challenge nonce,
    // AUTH user proof -> authorized.
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), ClientError> {
        let response = self
            .round_trip(&Request::Auth {
                username: credentials.username.clone(),
                proof: None,
            })
            .await?;
        let nonce = match response {
            Response::Challenge { nonce } => nonce,
            // Server has authentication disabled.
            Response::Authorized => return Ok(()),
            _ => return Err(ClientError::AuthFailed),
        };

        let proof = auth::compute_proof(&credentials.password, &nonce)
            .map_err(|e| ClientError::Protocol(format!("bad challenge: {}", e)))?;
        match self
            .round_trip(&Request::Auth {
                username: credentials.username.clone(),
                proof: Some(proof),
            })
            .await?
        {
            Response::Authorized => Ok(()),
            _ => Err(ClientError::AuthFailed),
        }
    }

    // Single write + read with no redial, used during the handshake.
    async fn round_trip(&mut self, request: &Request) -> Result<Response, ClientError> {
        let data = protocol::encode(request)?;
        protocol::write_message(&mut self.stream, &data).await?;
        let frame = protocol::read_message(&mut self.stream).await?;
        Ok(protocol::decode(&frame)?)
    }
}
