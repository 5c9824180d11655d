//! WebSocket transport adapter for the protocol gateway bridge.
//!
//! The bridge is the sidecar that actually speaks the messaging protocol; we
//! exchange small JSON frames with it over a WebSocket. Inbound frames map
//! 1:1 onto [`TransportEvent`]s, outbound frames onto [`TransportCommand`]s:
//!
//! ```text
//! bridge -> us: {"type":"qr","token":"..."}
//!              {"type":"open"}
//!              {"type":"close","code":401}
//!              {"type":"creds","bundle":{...}}
//!              {"type":"message","chatId":"...","text":"..."}
//! us -> bridge: {"type":"init","creds":{...}}   (first frame after connect)
//!              {"type":"send","chatId":"...","text":"..."}
//!              {"type":"logout"}
//! ```
//!
//! Dial failures and stream errors surface as a recoverable closed update,
//! so the supervisor retries them through its normal backoff path. Each
//! connection task emits exactly one closed update before exiting.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::creds::CredentialBundle;
use crate::message::MessageEnvelope;
use crate::transport::{
    CloseStatus, LifecycleUpdate, TransportCommand, TransportError, TransportEvent,
    TransportFactory, TransportHandle,
};

type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Wire frame exchanged with the gateway bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum GatewayFrame {
    // bridge -> us
    Qr { token: String },
    Open,
    Close {
        #[serde(default)]
        code: Option<u16>,
    },
    Creds { bundle: serde_json::Value },
    Message {
        #[serde(flatten)]
        envelope: MessageEnvelope,
    },
    // us -> bridge
    Init {
        #[serde(skip_serializing_if = "Option::is_none")]
        creds: Option<serde_json::Value>,
    },
    Send { chat_id: String, text: String },
    Logout,
}

/// Creates gateway-backed transports.
pub struct GatewayFactory {
    url: String,
}

impl GatewayFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl TransportFactory for GatewayFactory {
    fn create(
        &self,
        creds: Option<CredentialBundle>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<TransportHandle, TransportError> {
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(TransportError::InvalidUrl(self.url.clone()));
        }
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(self.url.clone(), creds, events, command_rx));
        Ok(TransportHandle::new(command_tx))
    }
}

async fn run_connection(
    url: String,
    creds: Option<CredentialBundle>,
    events: mpsc::Sender<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
) {
    let emit_closed = |code: Option<u16>| {
        let events = events.clone();
        async move {
            let _ = events
                .send(TransportEvent::Lifecycle(LifecycleUpdate::closed(
                    CloseStatus { code },
                )))
                .await;
        }
    };

    let mut ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(err) => {
            log::error!("failed to reach gateway at {url}: {err}");
            emit_closed(None).await;
            return;
        }
    };

    // Announce ourselves with the persisted credential bundle, if any.
    let init = GatewayFrame::Init {
        creds: creds.map(CredentialBundle::into_inner),
    };
    if let Err(err) = send_frame(&mut ws, &init).await {
        log::error!("gateway handshake failed: {err}");
        emit_closed(None).await;
        return;
    }
    log::debug!("gateway connection established");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(TransportCommand::SendText { chat_id, text }) => {
                    if let Err(err) = send_frame(&mut ws, &GatewayFrame::Send { chat_id, text }).await {
                        log::warn!("gateway send failed: {err}");
                    }
                }
                Some(TransportCommand::Logout) => {
                    if let Err(err) = send_frame(&mut ws, &GatewayFrame::Logout).await {
                        log::warn!("gateway logout failed: {err}");
                    }
                }
                // Terminate, or every handle dropped: tear the socket down.
                Some(TransportCommand::Terminate) | None => {
                    let _ = ws.close(None).await;
                    emit_closed(None).await;
                    return;
                }
            },
            frame = ws.next() => match frame {
                Some(Ok(WsMessage::Text(raw))) => {
                    match serde_json::from_str::<GatewayFrame>(&raw) {
                        Ok(GatewayFrame::Qr { token }) => {
                            let _ = events
                                .send(TransportEvent::Lifecycle(LifecycleUpdate::pairing(token)))
                                .await;
                        }
                        Ok(GatewayFrame::Open) => {
                            let _ = events
                                .send(TransportEvent::Lifecycle(LifecycleUpdate::connected()))
                                .await;
                        }
                        Ok(GatewayFrame::Close { code }) => {
                            // Protocol-level close; the frame stream ends here.
                            emit_closed(code).await;
                            return;
                        }
                        Ok(GatewayFrame::Creds { bundle }) => {
                            let _ = events
                                .send(TransportEvent::Credentials(CredentialBundle::new(bundle)))
                                .await;
                        }
                        Ok(GatewayFrame::Message { envelope }) => {
                            let _ = events.send(TransportEvent::Message(envelope)).await;
                        }
                        Ok(other) => {
                            log::warn!("unexpected outbound-only frame from gateway: {other:?}");
                        }
                        Err(err) => {
                            log::warn!("ignoring malformed gateway frame: {err}");
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    emit_closed(code).await;
                    return;
                }
                Some(Ok(_)) => {} // ping/pong/binary: nothing for us
                Some(Err(err)) => {
                    log::warn!("gateway stream error: {err}");
                    emit_closed(None).await;
                    return;
                }
                None => {
                    emit_closed(None).await;
                    return;
                }
            },
        }
    }
}

async fn send_frame(
    ws: &mut GatewayStream,
    frame: &GatewayFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let raw = match serde_json::to_string(frame) {
        Ok(raw) => raw,
        Err(err) => {
            log::warn!("failed to serialize gateway frame: {err}");
            return Ok(());
        }
    };
    ws.send(WsMessage::Text(raw)).await
}
