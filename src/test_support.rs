//! In-process HTTP server for downloader and manager tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Serves `router` on an ephemeral localhost port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Endpoint that answers 502 for its first `failures` hits, then `body`.
#[derive(Clone)]
pub struct Flaky {
    hits: Arc<AtomicUsize>,
    failures: usize,
    body: &'static str,
}

impl Flaky {
    pub fn new(failures: usize, body: &'static str) -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
            failures,
            body,
        }
    }

    /// Requests observed so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Router exposing this endpoint at `path`.
    pub fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, get(flaky_handler))
            .with_state(self.clone())
    }
}

async fn flaky_handler(State(flaky): State<Flaky>) -> impl IntoResponse {
    let n = flaky.hits.fetch_add(1, Ordering::SeqCst);
    if n < flaky.failures {
        (StatusCode::BAD_GATEWAY, "")
    } else {
        (StatusCode::OK, flaky.body)
    }
}

/// Raw HTTP/1.1 responder that promises `declared` body bytes, sends only
/// `body`, then closes the connection. Returns the base URL.
pub async fn serve_truncated(declared: usize, body: &'static [u8]) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\nConnection: close\r\n\r\n"
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(body).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}
