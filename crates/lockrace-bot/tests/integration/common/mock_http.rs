//! Mock HTTP submission endpoint for integration tests.
//!
//! Provides a minimal HTTP/1.1 server that can:
//! - Accept one request per connection
//! - Answer with a scripted status and JSON body
//! - Record received submissions
//! - Delay answers to keep requests in flight

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

/// Scripted answer: (1-based hit number, request body) -> (status, body).
pub type Responder = Arc<dyn Fn(u64, &serde_json::Value) -> (u16, String) + Send + Sync>;

/// A mock submission endpoint.
pub struct MockHttpServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
    hits: Arc<AtomicU64>,
}

impl MockHttpServer {
    /// Start a server on an available port.
    pub async fn start(responder: Responder) -> Self {
        Self::start_with_delay(responder, Duration::ZERO).await
    }

    /// Start a server that holds every answer back for `delay`.
    pub async fn start_with_delay(responder: Responder, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let requests_clone = requests.clone();
        let hits_clone = hits.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            responder.clone(),
                            requests_clone.clone(),
                            hits_clone.clone(),
                            delay,
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            requests,
            hits,
        }
    }

    /// Server that always answers with the same status and body.
    pub async fn fixed(status: u16, body: &str) -> Self {
        let body = body.to_string();
        Self::start(Arc::new(move |_, _| (status, body.clone()))).await
    }

    /// Endpoint URL.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of requests answered.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Received request bodies in arrival order.
    pub async fn requests(&self) -> Vec<serde_json::Value> {
        self.requests.lock().await.clone()
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    responder: Responder,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
    hits: Arc<AtomicU64>,
    delay: Duration,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let body: serde_json::Value =
        serde_json::from_slice(&buf[header_end..header_end + content_length])
            .unwrap_or(serde_json::Value::Null);
    let hit = hits.fetch_add(1, Ordering::SeqCst) + 1;
    requests.lock().await.push(body.clone());

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let (status, text) = responder(hit, &body);
    let response = format!(
        "HTTP/1.1 {status} MOCK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{text}",
        text.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
