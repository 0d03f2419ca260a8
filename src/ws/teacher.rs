//! Teacher-only command handlers
//!
//! Role is checked in the dispatch layer before these are called.

use crate::error::SessionError;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::OptionInput;
use std::sync::Arc;

use super::handlers::ConnectionCtx;

pub async fn handle_create_poll(
    state: &Arc<AppState>,
    ctx: &ConnectionCtx,
    identity: &str,
    question: String,
    options: Vec<OptionInput>,
    duration_seconds: u32,
) -> Option<ServerMessage> {
    tracing::info!(
        "Teacher {} creating poll with {} options for {}s",
        identity,
        options.len(),
        duration_seconds
    );
    match state
        .create_poll(identity, &ctx.id, &question, options, duration_seconds)
        .await
    {
        // pollCreated reaches this connection through the broadcast
        Ok(_) => None,
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_kick_out(
    state: &Arc<AppState>,
    ctx: &ConnectionCtx,
    identity: &str,
    target_identity: String,
) -> Option<ServerMessage> {
    tracing::info!("Teacher {} kicking {}", identity, target_identity);
    match state.kick(identity, &ctx.id, target_identity.trim()).await {
        Ok(_) => None,
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_close_poll(
    state: &Arc<AppState>,
    ctx: &ConnectionCtx,
    identity: &str,
) -> Option<ServerMessage> {
    match state.close_poll(identity, &ctx.id).await {
        Ok(true) => None,
        Ok(false) => Some(SessionError::NotOpen("No poll is open".to_string()).into()),
        Err(e) => Some(e.into()),
    }
}
