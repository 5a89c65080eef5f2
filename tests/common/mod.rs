//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use http_observation::config::ObservabilityConfig;
use http_observation::config::ServerConfig;
use http_observation::http::HttpServer;
use http_observation::lifecycle::{Observability, Shutdown};
use http_observation::observability::CollectingSpanReporter;

/// Observability stack whose spans are kept in memory.
pub fn collecting_stack() -> (Observability, Arc<CollectingSpanReporter>) {
    let spans = Arc::new(CollectingSpanReporter::new());
    let observability = Observability::with_reporter(&ObservabilityConfig::default(), spans.clone());
    (observability, spans)
}

/// A running observed server.
pub struct TestServer {
    pub observability: Observability,
    pub spans: Arc<CollectingSpanReporter>,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), std::io::Error>>,
}

impl TestServer {
    /// Trigger shutdown, wait for the drain, then run teardown hooks.
    #[allow(dead_code)]
    pub async fn stop(self) -> usize {
        self.shutdown.trigger();
        self.task.await.unwrap().unwrap();
        self.shutdown.teardown()
    }
}

/// Start the observed server on `addr` with default observability config.
#[allow(dead_code)]
pub async fn start_server(addr: SocketAddr) -> TestServer {
    let (observability, spans) = collecting_stack();
    let shutdown = Shutdown::new();

    let config = ServerConfig {
        bind_address: addr.to_string(),
        ..ServerConfig::default()
    };
    let listener = TcpListener::bind(addr).await.unwrap();
    let server = HttpServer::new(config, observability.registry.clone());
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    // Give the server a moment to start accepting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        observability,
        spans,
        shutdown,
        task,
    }
}

/// Start a raw backend that answers every request with `status` and `body`.
#[allow(dead_code)]
pub async fn start_fixed_backend(addr: SocketAddr, status: &'static str, body: &'static str) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let _ = socket.read(&mut buf).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}
