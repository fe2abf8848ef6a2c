//! services/api/src/web/ws_handler.rs
//!
//! The session socket. It mirrors every change of the caller's session to the
//! client and accepts reload requests.

use crate::{
    error::ApiError,
    web::{
        protocol::{ClientMessage, ServerMessage},
        state::AppState,
    },
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use plantai_core::session::Session;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(session): Extension<Arc<Session>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, session))
}

async fn send_message(sender: &WsSender, msg: &ServerMessage) -> Result<(), ApiError> {
    let json = serde_json::to_string(msg).map_err(|e| ApiError::Internal(e.to_string()))?;
    sender.lock().await.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, session: Arc<Session>) {
    info!("New WebSocket connection established for user: {}", session.user().id);

    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));
    let token = CancellationToken::new();

    // --- 1. Forward session changes ---
    let forwarder = {
        let ws_sender = ws_sender.clone();
        let token = token.clone();
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = forward_changes(session, ws_sender, token.clone()).await {
                warn!("Session forwarder stopped: {}", e);
            }
            token.cancel();
        })
    };

    // --- 2. Main Message Loop ---
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            msg = receiver.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Reload) => {
                    info!("Reload requested by {}", session.user().id);
                    session.bootstrap(&app_state.engine).await;
                }
                Err(e) => {
                    warn!("Failed to deserialize client message: {}", e);
                    let reply = ServerMessage::Error {
                        message: format!("Unrecognised message: {}", e),
                    };
                    if let Err(e) = send_message(&ws_sender, &reply).await {
                        error!("Failed to send error message: {}", e);
                        break;
                    }
                }
            },
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
            None => {
                info!("Client disconnected.");
                break;
            }
        }
    }

    // --- 3. Cleanup ---
    token.cancel();
    if let Err(e) = forwarder.await {
        error!("Session forwarder panicked: {:?}", e);
    }
    info!("WebSocket connection closed.");
}

/// Sends the current phase, then every subsequent one, until the session ends
/// or the connection is cancelled.
async fn forward_changes(
    session: Arc<Session>,
    ws_sender: WsSender,
    token: CancellationToken,
) -> Result<(), ApiError> {
    let mut rx = session.subscribe();
    loop {
        let msg = ServerMessage::from(&*rx.borrow_and_update());
        send_message(&ws_sender, &msg).await?;

        if msg == ServerMessage::SessionEnded {
            ws_sender.lock().await.send(Message::Close(None)).await?;
            return Ok(());
        }

        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            changed = rx.changed() => {
                if changed.is_err() {
                    // The session was dropped; treat it as ended.
                    send_message(&ws_sender, &ServerMessage::SessionEnded).await?;
                    return Ok(());
                }
            }
        }
    }
}
