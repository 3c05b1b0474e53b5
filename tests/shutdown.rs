//! Graceful shutdown: every connected client is notified, then the process
//! side completes within the grace period.

mod common;

use common::{TestClient, TestServer};
use std::time::Duration;

#[tokio::test]
async fn shutdown_notifies_clients_and_completes() {
    let server = TestServer::spawn().await.expect("spawn server");

    let mut a = TestClient::connect(server.addr).await.unwrap();
    let mut b = TestClient::connect(server.addr).await.unwrap();
    let mut c = TestClient::connect(server.addr).await.unwrap();
    a.register_and_login("alice", "correct horse battery").await.unwrap();
    b.register_and_login("bob", "correct horse battery").await.unwrap();
    c.register_and_login("carol", "correct horse battery").await.unwrap();

    let started = std::time::Instant::now();
    let hub = std::sync::Arc::clone(&server.hub);
    let shutdown = tokio::spawn(server.shutdown());

    for client in [&mut a, &mut b, &mut c] {
        let line = client
            .recv_until(|l| l.starts_with("ERROR"))
            .await
            .expect("shutdown notice");
        assert_eq!(line, "ERROR :Server shutting down");
        assert!(client.expect_closed().await, "connection must close");
    }

    shutdown.await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "shutdown must complete within the grace period"
    );
    assert!(hub.connections.is_empty());
}

#[tokio::test]
async fn new_connections_are_refused_after_shutdown() {
    let server = TestServer::spawn().await.expect("spawn server");
    let addr = server.addr;
    server.shutdown().await;

    // The listener is gone; a fresh connect must fail or reach EOF at once.
    match tokio::net::TcpStream::connect(addr).await {
        Err(_) => {}
        Ok(stream) => {
            let mut buf = [0u8; 1];
            use tokio::io::AsyncReadExt;
            let mut stream = stream;
            let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
            assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
        }
    }
}
