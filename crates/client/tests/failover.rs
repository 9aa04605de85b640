// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests against real in-process latchd servers.
//!
//! Each server runs on its own runtime so killing it drops the listener
//! and every open connection at once, the way a crashed process would.

use std::sync::Arc;
use std::time::Duration;

use latch_client::{Client, ClientConfig};
use latch_daemon::config::ServerConfig;
use latch_daemon::server::{self, ServerState};

struct TestServer {
    addr: String,
    runtime: Option<tokio::runtime::Runtime>,
}

impl TestServer {
    fn kill(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.kill();
    }
}

fn spawn_server() -> TestServer {
    spawn_server_with("127.0.0.1:0", ServerConfig::default())
}

fn spawn_server_with(bind: &str, config: ServerConfig) -> TestServer {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("server runtime");
    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    let bind = bind.to_string();
    runtime.spawn(async move {
        let listener = tokio::net::TcpListener::bind(&bind).await.expect("bind");
        addr_tx
            .send(listener.local_addr().expect("local addr").to_string())
            .expect("send addr");
        let state = Arc::new(ServerState::new(config));
        loop {
            let Ok((stream, peer)) = listener.accept().await else {
                break;
            };
            server::spawn_connection(Arc::clone(&state), stream, peer);
        }
    });
    let addr = addr_rx.recv().expect("server did not start");
    TestServer {
        addr,
        runtime: Some(runtime),
    }
}

fn fleet(n: usize) -> (Vec<TestServer>, Vec<String>) {
    let servers: Vec<TestServer> = (0..n).map(|_| spawn_server()).collect();
    let endpoints = servers.iter().map(|s| s.addr.clone()).collect();
    (servers, endpoints)
}

#[tokio::test]
async fn lock_unlock_roundtrip() {
    let server = spawn_server();
    let client = Client::connect(ClientConfig::new([server.addr.clone()])).await;

    let id = client
        .lock("resource", Duration::from_secs(5))
        .await
        .expect("lock failed");
    assert!(id > 0);

    assert!(client.unlock("resource", id).await.expect("unlock failed"));
    // A second unlock of the same lease is a no-op.
    assert!(!client.unlock("resource", id).await.expect("unlock failed"));
}

#[tokio::test]
async fn expired_lease_reports_not_unlocked() {
    let server = spawn_server();
    let client = Client::connect(ClientConfig::new([server.addr.clone()])).await;

    let id = client
        .lock("short", Duration::from_millis(200))
        .await
        .expect("lock failed");

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(!client.unlock("short", id).await.expect("unlock failed"));
}

#[tokio::test]
async fn sized_lock_allows_multiple_holders() {
    let server = spawn_server();
    let client = Client::connect(ClientConfig::new([server.addr.clone()])).await;

    let a = client
        .lock_sized("pool", 2, Duration::from_secs(5))
        .await
        .expect("first lock failed");
    let b = client
        .lock_sized("pool", 2, Duration::from_secs(5))
        .await
        .expect("second lock failed");

    assert!(b > a);
    assert!(client.unlock("pool", a).await.expect("unlock failed"));
    assert!(client.unlock("pool", b).await.expect("unlock failed"));
}

#[tokio::test]
async fn keys_shard_across_the_fleet() {
    let (_servers, endpoints) = fleet(3);
    let client = Client::connect(ClientConfig::new(endpoints)).await;
    assert_eq!(client.live_endpoints().len(), 3);

    for i in 0..20 {
        let key = format!("key-{}", i);
        let id = client
            .lock(&key, Duration::from_secs(5))
            .await
            .expect("lock failed");
        assert!(client.unlock(&key, id).await.expect("unlock failed"));
    }
}

#[tokio::test]
async fn failover_reroutes_after_server_loss() {
    let (mut servers, endpoints) = fleet(3);
    let client = Client::connect(ClientConfig::new(endpoints)).await;
    assert_eq!(client.live_endpoints().len(), 3);

    servers[1].kill();

    // Every key still locks: keys owned by the dead server hit a
    // connection error, the endpoint leaves the ring, and the retry lands
    // on the new owner.
    for i in 0..200 {
        let key = format!("key-{}", i);
        let id = client
            .lock(&key, Duration::from_secs(5))
            .await
            .expect("lock failed after server loss");
        assert!(id > 0);
        if client.live_endpoints().len() == 2 {
            break;
        }
    }
    assert_eq!(client.live_endpoints().len(), 2);
}

#[tokio::test]
async fn probe_re_admits_recovered_endpoints() {
    let (mut servers, endpoints) = fleet(2);
    let client = Client::connect(
        ClientConfig::new(endpoints).with_probe_interval(Duration::from_millis(100)),
    )
    .await;

    let lost = servers[1].addr.clone();
    servers[1].kill();

    // Drive traffic until the client notices the loss.
    for i in 0..200 {
        client
            .lock(&format!("key-{}", i), Duration::from_secs(5))
            .await
            .expect("lock failed");
        if client.live_endpoints().len() == 1 {
            break;
        }
    }
    assert_eq!(client.live_endpoints().len(), 1);

    // Revive a server on the same address; the probe should re-admit it.
    let _revived = spawn_server_with(&lost, ServerConfig::default());
    for _ in 0..50 {
        if client.live_endpoints().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(client.live_endpoints().contains(&lost));

    let id = client
        .lock("after-recovery", Duration::from_secs(5))
        .await
        .expect("lock failed after recovery");
    assert!(id > 0);
}

#[tokio::test]
async fn authenticated_fleet_round_trip() {
    let config: ServerConfig =
        serde_json::from_str(r#"{"authentication": {"deploy": "hunter2"}}"#).expect("config");
    let server = spawn_server_with("127.0.0.1:0", config);

    let client = Client::connect(
        ClientConfig::new([server.addr.clone()]).with_credentials("deploy", "hunter2"),
    )
    .await;

    let id = client
        .lock("guarded", Duration::from_secs(5))
        .await
        .expect("lock failed");
    assert!(client.unlock("guarded", id).await.expect("unlock failed"));
}

#[tokio::test]
async fn wrong_credentials_leave_the_ring_empty() {
    let config: ServerConfig =
        serde_json::from_str(r#"{"authentication": {"deploy": "hunter2"}}"#).expect("config");
    let server = spawn_server_with("127.0.0.1:0", config);

    let client = Client::connect(
        ClientConfig::new([server.addr.clone()]).with_credentials("deploy", "letmein"),
    )
    .await;

    assert!(client.live_endpoints().is_empty());
    let result = client.lock("guarded", Duration::from_secs(5)).await;
    assert!(matches!(result, Err(latch_client::ClientError::NoEndpoints)));
}
