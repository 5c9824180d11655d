//! HTTP surface for wabot: session status, pairing QR page, logout.
//!
//! Thin layer over the supervisor handle; nothing here blocks on the
//! transport, since status reads are watch-channel snapshots.

mod qr;
mod routes;
mod state;

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

pub use state::SharedState;

/// Build the router for the status/pairing surface.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/status", get(routes::status))
        .route("/qr", get(routes::qr_page))
        .route("/logout", post(routes::logout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Handle to a running HTTP server.
pub struct HttpServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl HttpServerHandle {
    /// Check if the server is running.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Stop the server gracefully.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Start the HTTP server on the given address.
///
/// Runs on the caller's runtime; the returned handle stops it gracefully.
pub async fn start(state: SharedState, addr: SocketAddr) -> Result<HttpServerHandle, std::io::Error> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("HTTP server listening on http://{}", listener.local_addr()?);

    let app = router(state);
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                log::info!("HTTP server shutting down");
            })
            .await
            .ok();
    });

    Ok(HttpServerHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

// ============================================================================
// TESTS
// ============================================================================
