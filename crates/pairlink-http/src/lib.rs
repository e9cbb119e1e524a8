//! HTTP server for Pairlink.
//!
//! Exposes the session lifecycle via REST and lifecycle events via WebSocket.

mod routes;
mod state;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

pub use routes::ApiResponse;
pub use state::SharedState;

/// Handle to a running HTTP server.
#[derive(Default)]
pub struct HttpServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl HttpServerHandle {
    /// Check if the server is running.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop the server gracefully and wait for in-flight requests.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("HTTP server task ended abnormally: {}", e);
            }
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route(
            "/api/sessions/{user_id}",
            get(routes::get_status).delete(routes::disconnect),
        )
        .route("/api/sessions/{user_id}/qr", post(routes::start_qr))
        .route(
            "/api/sessions/{user_id}/pairing-code",
            post(routes::start_pairing),
        )
        .route("/ws/events", get(websocket::ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Start the HTTP server on the given host and port.
///
/// The listener is bound before returning, so address errors surface here.
/// The server runs as a task on the current runtime, next to the
/// supervisor's connection tasks.
pub async fn start(
    state: Arc<SharedState>,
    host: &str,
    port: u16,
) -> Result<HttpServerHandle, String> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind HTTP server to {}: {}", addr, e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {}", e))?;
    log::info!("HTTP server listening on http://{}", local_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let app = router(state);
    let task = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                log::info!("HTTP server shutting down");
            })
            .await;
        if let Err(e) = served {
            log::error!("HTTP server failed: {}", e);
        }
    });

    Ok(HttpServerHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
        local_addr: Some(local_addr),
    })
}

// ============================================================================
// TESTS
// ============================================================================
