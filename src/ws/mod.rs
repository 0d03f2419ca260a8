pub mod handlers;
pub mod student;
pub mod teacher;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::SessionError;
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::state::AppState;
use crate::types::Role;
use handlers::ConnectionCtx;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub role: Option<String>,
    /// Join right away instead of waiting for a `joinChat` message
    pub identity: Option<String>,
}

impl WsQuery {
    pub fn parse_role(&self) -> Option<Role> {
        self.role.as_deref().and_then(Role::parse)
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    tracing::info!(
        "WebSocket connection request: role={:?}, identity={:?}",
        params.role,
        params.identity
    );

    let Some(role) = params.parse_role() else {
        return (
            StatusCode::BAD_REQUEST,
            "role must be \"teacher\" or \"student\"",
        )
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, role, params.identity, state))
}

/// Serialize and send; false once the socket is gone
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            true
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    role: Role,
    identity: Option<String>,
    state: Arc<AppState>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing between the two is lost
    let mut subscription = state.connect(role);
    let mut ctx = ConnectionCtx::new(subscription.id().clone(), role);
    tracing::info!(
        connection = %ctx.id,
        connections = state.hub.connection_count(),
        "WebSocket connected with role: {:?}",
        role
    );

    let mut join_error = None;
    if let Some(identity) = identity.filter(|i| !i.trim().is_empty()) {
        match state.join(&identity, role, &ctx.id).await {
            Ok(participant) => ctx.identity = Some(participant.identity),
            Err(e) => {
                tracing::info!("Join as {} refused: {}", identity, e);
                join_error = Some(ServerMessage::from(e));
            }
        }
    }

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        role,
        identity: ctx.identity.clone(),
        server_now: chrono::Utc::now().to_rfc3339(),
        session: state.snapshot().await,
    };
    if !send_message(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        if let Some(identity) = &ctx.identity {
            state.leave(identity, &ctx.id, false).await;
        }
        return;
    }
    if let Some(error) = join_error {
        if !send_message(&mut sender, &error).await {
            return;
        }
    }

    // A clean close forgets the participant; a broken transport keeps the
    // identity reserved as disconnected so it can be resumed
    let mut clean = true;

    loop {
        tokio::select! {
            // Session events for this connection
            event = subscription.recv() => {
                match event {
                    Some(msg) => {
                        if !send_message(&mut sender, &msg).await {
                            clean = false;
                            break;
                        }
                    }
                    None => {
                        // Server closed our queue (kicked, or too slow to keep up)
                        tracing::info!(connection = %ctx.id, "Outbound queue closed, closing socket");
                        let _ = sender.send(Message::Close(None)).await;
                        clean = false;
                        break;
                    }
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        let response = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handlers::handle_message(client_msg, &mut ctx, &state).await
                            }
                            Err(e) => {
                                tracing::warn!("Failed to parse client message: {}", e);
                                Some(ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                })
                            }
                        };

                        if let Some(response) = response {
                            if !send_message(&mut sender, &response).await {
                                tracing::error!("Failed to send response");
                                clean = false;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            clean = false;
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = SessionError::Connection(e.to_string());
                        tracing::warn!(connection = %ctx.id, "{}", err);
                        clean = false;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(identity) = &ctx.identity {
        state.leave(identity, &ctx.id, clean).await;
    }
    tracing::info!(
        connection = %ctx.id,
        clean,
        "WebSocket connection closed for role: {:?}",
        role
    );
}
