//! HTTP server
//!
//! Routes:
//! - `GET /` serves a viewer page embedding today's stream URL
//! - `GET /stream?token=…` streams `multipart/x-mixed-replace` JPEG frames

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;

use crate::error::Result;
use crate::registry::Distributor;
use crate::server::config::{ServerConfig, ViewConfig};
use crate::server::gate::AntiIndexer;
use crate::server::handler::ViewerPolicy;
use crate::session::{ViewerSession, CONTENT_TYPE};

/// In-memory pipe size between a session task and its response body
const BODY_BUFFER_SIZE: usize = 64 * 1024;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Clone)]
struct AppState {
    distributor: Distributor,
    policy: Arc<dyn ViewerPolicy>,
    view: ViewConfig,
    gate: Arc<AntiIndexer>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

/// MJPEG relay HTTP server
pub struct RelayServer {
    config: ServerConfig,
    distributor: Distributor,
    policy: Arc<dyn ViewerPolicy>,
    gate: Arc<AntiIndexer>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Create a server with a fresh anti-indexing salt
    pub fn new(config: ServerConfig, distributor: Distributor, policy: Arc<dyn ViewerPolicy>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            distributor,
            policy,
            gate: Arc::new(AntiIndexer::new()),
            connection_semaphore,
        }
    }

    /// Use a specific gate (fixed salt or custom denied response)
    pub fn with_gate(mut self, gate: AntiIndexer) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    /// Get the distributor feeding this server
    pub fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    /// Get the anti-indexing gate
    pub fn gate(&self) -> &Arc<AntiIndexer> {
        &self.gate
    }

    /// Build the axum router
    pub fn router(&self) -> Router {
        let state = AppState {
            distributor: self.distributor.clone(),
            policy: Arc::clone(&self.policy),
            view: self.config.view.clone(),
            gate: Arc::clone(&self.gate),
            connection_semaphore: self.connection_semaphore.clone(),
        };

        let stream = self
            .gate
            .protect(Router::new().route("/stream", get(stream_handler)));

        Router::new()
            .route("/", get(index_handler))
            .merge(stream)
            .with_state(state)
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "MJPEG relay listening");

        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Run the server until `shutdown` resolves
    ///
    /// Open streams are dropped rather than drained; they would never finish
    /// on their own.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "MJPEG relay listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = axum::serve(listener, self.router()).into_future() => {
                result?;
                Ok(())
            }
        }
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Live</title></head>\n<body>\n\
         <img src=\"/stream?token={}\" alt=\"live stream\">\n</body>\n</html>\n",
        state.gate.token()
    ))
}

async fn stream_handler(State(state): State<AppState>) -> Response {
    let permit = match &state.connection_semaphore {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!("Stream rejected: connection limit reached");
                return (StatusCode::SERVICE_UNAVAILABLE, "Too many viewers").into_response();
            }
        },
        None => None,
    };

    let session = match ViewerSession::open(
        &state.distributor,
        Arc::clone(&state.policy),
        state.view.clone(),
    ) {
        Ok(session) => session,
        Err(e) => {
            tracing::info!(error = %e, "Stream rejected");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let (mut writer, reader) = tokio::io::duplex(BODY_BUFFER_SIZE);
    tokio::spawn(async move {
        let _permit = permit;
        session.run(&mut writer).await;
    });

    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::gate::SALT_LEN;
    use crate::server::handler::{AllowAll, LocalPolicy};
    use futures_util::StreamExt;
    use tower::ServiceExt;

    fn server(config: ServerConfig, policy: Arc<dyn ViewerPolicy>) -> RelayServer {
        let distributor = Distributor::new(Arc::clone(&policy));
        RelayServer::new(config, distributor, policy).with_gate(AntiIndexer::with_salt([5; SALT_LEN]))
    }

    fn request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn first_chunk(response: Response) -> bytes::Bytes {
        let mut body = response.into_body().into_data_stream();
        body.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_index_embeds_token() {
        let server = server(ServerConfig::default(), Arc::new(AllowAll));
        let token = server.gate().token();

        let response = server.router().oneshot(request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains(&format!("/stream?token={}", token)));
    }

    #[tokio::test]
    async fn test_stream_requires_token() {
        let server = server(ServerConfig::default(), Arc::new(AllowAll));

        let response = server.router().oneshot(request("/stream")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(server.distributor().viewer_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_headers_and_opening_boundary() {
        let server = server(ServerConfig::default(), Arc::new(AllowAll));
        let uri = format!("/stream?token={}", server.gate().token());

        let response = server.router().oneshot(request(&uri)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], CONTENT_TYPE);
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert_eq!(server.distributor().viewer_count(), 1);

        let chunk = first_chunk(response).await;
        assert!(chunk.starts_with(b"--jpegBoundary\r\n"));
    }

    #[tokio::test]
    async fn test_rejected_viewer_gets_error() {
        let server = server(
            ServerConfig::default(),
            Arc::new(LocalPolicy::new().max_viewers(0)),
        );
        let uri = format!("/stream?token={}", server.gate().token());

        let response = server.router().oneshot(request(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("viewer limit"));
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let server = server(ServerConfig::default().max_connections(1), Arc::new(AllowAll));
        let uri = format!("/stream?token={}", server.gate().token());

        let first = server.router().oneshot(request(&uri)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = server.router().oneshot(request(&uri)).await.unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);

        drop(first);
    }
}
