//! HTTP health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness check (always 200 while the process runs)
//! - `GET /ready` - Readiness check (503 once the broker is shutting down)
//! - `GET /live` - Alias for `/health`
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! # Usage
//!
//! ```rust,no_run
//! use tidemq::server::health::HealthServer;
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutting_down = Arc::new(AtomicBool::new(false));
//!     let server = HealthServer::new("0.0.0.0:8080", shutting_down).await.unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::cluster::metrics;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Alive but draining, new publishers should go elsewhere.
    NotReady,
}

impl HealthStatus {
    pub fn http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::NotReady => 503,
        }
    }

    pub fn http_status_text(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "OK",
            HealthStatus::NotReady => "Service Unavailable",
        }
    }
}

/// Lightweight HTTP server running alongside the broker listener.
pub struct HealthServer {
    listener: TcpListener,
    shutting_down: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    /// Broker address echoed in responses.
    broker: Option<String>,
}

impl HealthServer {
    pub async fn new(addr: &str, shutting_down: Arc<AtomicBool>) -> Result<Self> {
        Self::with_broker(addr, shutting_down, None).await
    }

    /// Create a health server that names `broker` in its responses.
    pub async fn with_broker(
        addr: &str,
        shutting_down: Arc<AtomicBool>,
        broker: Option<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::IoError(e.kind()))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(addr = %addr, "Health server listening");

        Ok(Self {
            listener,
            shutting_down,
            shutdown_tx,
            broker,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::IoError(e.kind()))
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Health server shutdown signal sent");
    }

    pub fn is_ready(&self) -> bool {
        !self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn health_status(&self) -> HealthStatus {
        if self.is_ready() {
            HealthStatus::Healthy
        } else {
            HealthStatus::NotReady
        }
    }

    /// Serve requests until `shutdown` is called.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Health server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(client_addr = %addr, "Health check connection");
                        tokio::spawn(serve_probe(stream, self.shutting_down.clone(), self.broker.clone()));
                    }
                    Err(e) => warn!(error = ?e, "Failed to accept health check connection"),
                },
            }
        }
    }
}

/// Answer one request and close the connection.
async fn serve_probe(mut stream: TcpStream, shutting_down: Arc<AtomicBool>, broker: Option<String>) {
    let mut buf = [0u8; 1024];
    let n = match stream.read(&mut buf).await {
        Ok(0) => {
            debug!("Empty health request");
            return;
        }
        Ok(n) => n,
        Err(e) => {
            debug!(error = ?e, "Failed to read health request");
            return;
        }
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let response = handle_request(&request, &shutting_down, broker.as_deref());
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = ?e, "Failed to write health response");
    }
}

const TEXT: &str = "text/plain";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

const ENDPOINTS: &str = "Available endpoints:\n\
     - /health - Liveness check\n\
     - /live - Alias for /health\n\
     - /ready - Readiness check (fails while shutting down)\n\
     - /metrics - Prometheus metrics\n";

fn handle_request(request: &str, shutting_down: &AtomicBool, broker: Option<&str>) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let status = match path.trim_end_matches('/') {
        "/health" | "/healthz" => (HealthStatus::Healthy, "status: healthy\n"),
        "/live" | "/livez" => (HealthStatus::Healthy, "status: alive\n"),
        "/ready" | "/readyz" if shutting_down.load(Ordering::SeqCst) => (
            HealthStatus::NotReady,
            "status: not_ready\nreason: shutting_down\n",
        ),
        "/ready" | "/readyz" => (HealthStatus::Healthy, "status: ready\n"),
        "/metrics" => return metrics_response(),
        _ => return http_response(404, "Not Found", TEXT, ENDPOINTS),
    };

    let (status, body) = status;
    let body = match broker {
        Some(b) => format!("{}broker: {}\n", body, b),
        None => body.to_string(),
    };
    http_response(
        status.http_status_code(),
        status.http_status_text(),
        TEXT,
        &body,
    )
}

fn metrics_response() -> String {
    match metrics::encode_metrics() {
        Ok(body) => http_response(200, "OK", PROMETHEUS_TEXT, &body),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            http_response(
                500,
                "Internal Server Error",
                TEXT,
                "error: failed to encode metrics\n",
            )
        }
    }
}

fn http_response(code: u16, reason: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        code,
        reason,
        content_type,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_request() {
        let flag = AtomicBool::new(false);
        let response = handle_request("GET /health HTTP/1.1\r\n", &flag, Some("b1:17777"));
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("status: healthy"));
        assert!(response.contains("broker: b1:17777"));
    }

    #[test]
    fn test_ready_flips_when_shutting_down() {
        let flag = AtomicBool::new(false);
        let response = handle_request("GET /ready HTTP/1.1\r\n", &flag, None);
        assert!(response.contains("200 OK"));
        assert!(response.contains("status: ready"));

        flag.store(true, Ordering::SeqCst);
        let response = handle_request("GET /ready HTTP/1.1\r\n", &flag, None);
        assert!(response.contains("503 Service Unavailable"));
        assert!(response.contains("reason: shutting_down"));
    }

    #[test]
    fn test_kubernetes_style_and_trailing_slash_paths() {
        let flag = AtomicBool::new(false);
        for path in ["/healthz", "/readyz", "/livez", "/health/", "/live/"] {
            let request = format!("GET {} HTTP/1.1\r\n", path);
            assert!(handle_request(&request, &flag, None).contains("200 OK"), "{path}");
        }
    }

    #[test]
    fn test_unknown_and_malformed_requests() {
        let flag = AtomicBool::new(false);
        for request in ["GET /unknown HTTP/1.1\r\n", "", "INVALID"] {
            let response = handle_request(request, &flag, None);
            assert!(response.contains("404 Not Found"));
            assert!(response.contains("Available endpoints"));
        }
    }

    #[test]
    fn test_metrics_request() {
        metrics::init_metrics();
        let flag = AtomicBool::new(false);
        let response = handle_request("GET /metrics HTTP/1.1\r\n", &flag, None);
        assert!(response.contains("200 OK"));
        assert!(response.contains("tidemq_"));
    }

    #[tokio::test]
    async fn test_health_server_reports_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        match HealthServer::new("127.0.0.1:0", flag.clone()).await {
            Ok(server) => {
                assert!(server.local_addr().unwrap().port() > 0);
                assert_eq!(server.health_status(), HealthStatus::Healthy);
                flag.store(true, Ordering::SeqCst);
                assert!(!server.is_ready());
                assert_eq!(server.health_status().http_status_code(), 503);
            }
            Err(Error::IoError(std::io::ErrorKind::PermissionDenied)) => {
                // Skip test if we can't bind (CI environments may have restrictions)
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_health_server_serves_and_shuts_down() {
        let flag = Arc::new(AtomicBool::new(false));
        let server = match HealthServer::new("127.0.0.1:0", flag).await {
            Ok(server) => Arc::new(server),
            Err(Error::IoError(std::io::ErrorKind::PermissionDenied)) => return,
            Err(e) => panic!("Unexpected error: {:?}", e),
        };
        let addr = server.local_addr().unwrap();
        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /live HTTP/1.1\r\n\r\n").await.unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.contains("status: alive"));

        server.shutdown();
        assert!(handle.await.unwrap().is_ok());
    }
}
