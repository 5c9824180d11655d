//! HTTP route handlers for the status/pairing surface.

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, Json},
};
use serde::Serialize;
use wabot_core::session::SupervisorError;

use super::{qr, SharedState};

/// Response format for the status query.
#[derive(Serialize)]
pub struct StatusResponse {
    /// Whether the session is authenticated and live.
    pub connected: bool,
    /// Pairing token waiting to be scanned, if any.
    #[serde(rename = "pairingToken", skip_serializing_if = "Option::is_none")]
    pub pairing_token: Option<String>,
}

/// Response format for commands (logout).
#[derive(Serialize)]
pub struct CommandResponse {
    /// Whether the command succeeded.
    pub success: bool,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handler for GET /
pub async fn root(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let status = state.supervisor.status();
    Json(serde_json::json!({
        "status": "running",
        "connected": status.connected(),
    }))
}

/// Handler for GET /status
pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let status = state.supervisor.status();
    Json(StatusResponse {
        connected: status.connected(),
        pairing_token: status.pairing_token,
    })
}

/// Handler for GET /qr
///
/// Serves a scannable page while a pairing token is outstanding.
pub async fn qr_page(State(state): State<SharedState>) -> Html<String> {
    let status = state.supervisor.status();
    let Some(token) = status.pairing_token else {
        return Html(
            "<h3>QR not available</h3>\n\
             <p>Bot already connected or waiting for reconnection.</p>"
                .to_string(),
        );
    };

    match qr::render_svg(&token) {
        Ok(svg) => Html(format!(
            "<h2>Scan pairing QR</h2>\n{svg}\n<p>WhatsApp → Linked Devices → Link a Device</p>"
        )),
        Err(err) => {
            log::error!("failed to render pairing QR: {err}");
            Html("<h3>Failed to render QR</h3>".to_string())
        }
    }
}

/// Handler for POST /logout
pub async fn logout(State(state): State<SharedState>) -> (StatusCode, Json<CommandResponse>) {
    match state.supervisor.logout().await {
        Ok(()) => (
            StatusCode::OK,
            Json(CommandResponse {
                success: true,
                error: None,
            }),
        ),
        Err(err @ SupervisorError::NoActiveSession) => (
            StatusCode::CONFLICT,
            Json(CommandResponse {
                success: false,
                error: Some(err.to_string()),
            }),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CommandResponse {
                success: false,
                error: Some(err.to_string()),
            }),
        ),
    }
}
