//! WebSocket message dispatch
//!
//! Role and join checks happen here, then the message is handed to the
//! role-specific handler module.

use crate::error::SessionError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::{ConnectionId, Identity, Role};
use std::sync::Arc;

use super::{student, teacher};

/// Per-connection state owned by the socket task
#[derive(Debug, Clone)]
pub struct ConnectionCtx {
    pub id: ConnectionId,
    pub role: Role,
    /// Set once the connection has joined
    pub identity: Option<Identity>,
}

impl ConnectionCtx {
    pub fn new(id: ConnectionId, role: Role) -> Self {
        Self {
            id,
            role,
            identity: None,
        }
    }
}

/// Reject the message unless the connection was opened with `$role`
macro_rules! check_role {
    ($ctx:expr, $role:expr, $action:expr) => {
        if $ctx.role != $role {
            return Some(
                SessionError::Forbidden(format!("Only a {:?} can {}", $role, $action).to_lowercase())
                    .into(),
            );
        }
    };
}

/// Evaluate to the joined identity, or reply with an error
macro_rules! require_joined {
    ($ctx:expr) => {
        match $ctx.identity.clone() {
            Some(identity) => identity,
            None => {
                return Some(
                    SessionError::Validation("Join the session first".to_string()).into(),
                )
            }
        }
    };
}

/// Handle client messages and return optional direct response
pub async fn handle_message(
    msg: ClientMessage,
    ctx: &mut ConnectionCtx,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::JoinChat { identity } => handle_join(state, ctx, identity).await,

        ClientMessage::SyncState => Some(ServerMessage::SessionState {
            session: state.snapshot().await,
        }),

        ClientMessage::ChatMessage { text } => {
            let identity = require_joined!(ctx);
            match state.send_chat(&identity, &ctx.id, &text).await {
                Ok(()) => None,
                Err(e) => Some(e.into()),
            }
        }

        // Teacher-only commands
        ClientMessage::CreatePoll {
            question,
            options,
            duration_seconds,
        } => {
            check_role!(ctx, Role::Teacher, "create polls");
            let identity = require_joined!(ctx);
            teacher::handle_create_poll(state, ctx, &identity, question, options, duration_seconds)
                .await
        }

        ClientMessage::KickOut { target_identity } => {
            check_role!(ctx, Role::Teacher, "remove participants");
            let identity = require_joined!(ctx);
            teacher::handle_kick_out(state, ctx, &identity, target_identity).await
        }

        ClientMessage::ClosePoll => {
            check_role!(ctx, Role::Teacher, "close polls");
            let identity = require_joined!(ctx);
            teacher::handle_close_poll(state, ctx, &identity).await
        }

        // Student commands
        ClientMessage::SubmitAnswer { poll_id, option } => {
            check_role!(ctx, Role::Student, "answer polls");
            let identity = require_joined!(ctx);
            student::handle_submit_answer(state, ctx, &identity, poll_id, option).await
        }
    }
}

async fn handle_join(
    state: &Arc<AppState>,
    ctx: &mut ConnectionCtx,
    identity: Identity,
) -> Option<ServerMessage> {
    if let Some(current) = &ctx.identity {
        if current != identity.trim() {
            return Some(
                SessionError::Conflict(format!("This connection already joined as {}", current))
                    .into(),
            );
        }
    }

    match state.join(&identity, ctx.role, &ctx.id).await {
        Ok(participant) => {
            ctx.identity = Some(participant.identity.clone());
            Some(ServerMessage::Joined {
                identity: participant.identity,
                role: participant.role,
                session: state.snapshot().await,
            })
        }
        Err(e) => {
            tracing::info!("Join as {} refused: {}", identity, e);
            Some(e.into())
        }
    }
}
