//! Student message handlers

use crate::protocol::ServerMessage;
use crate::state::AppState;
use std::sync::Arc;

use super::handlers::ConnectionCtx;

pub async fn handle_submit_answer(
    state: &Arc<AppState>,
    ctx: &ConnectionCtx,
    identity: &str,
    poll_id: String,
    option: usize,
) -> Option<ServerMessage> {
    let poll_id = Some(poll_id).filter(|id| !id.is_empty());
    match state
        .submit_vote(identity, &ctx.id, poll_id.as_deref(), option)
        .await
    {
        Ok(poll_id) => Some(ServerMessage::VoteAck { poll_id, option }),
        Err(e) => {
            tracing::debug!("Vote from {} rejected: {}", identity, e);
            Some(e.into())
        }
    }
}
