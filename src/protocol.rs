use crate::types::*;
use serde::{Deserialize, Serialize};

/// Protocol version announced in the welcome message
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Idempotent presence registration
    JoinChat {
        identity: Identity,
    },
    // Teacher-only messages
    CreatePoll {
        question: String,
        options: Vec<OptionInput>,
        duration_seconds: u32,
    },
    KickOut {
        target_identity: Identity,
    },
    /// Close the open poll before its timer runs out
    ClosePoll,
    // Student messages
    SubmitAnswer {
        poll_id: PollId,
        option: usize,
    },
    // Any joined participant
    ChatMessage {
        text: String,
    },
    /// Re-fetch the current session state (reconnect catch-up)
    SyncState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        role: Role,
        identity: Option<Identity>,
        server_now: String,
        session: SessionSnapshot,
    },
    Joined {
        identity: Identity,
        role: Role,
        session: SessionSnapshot,
    },
    PollCreated {
        poll_id: PollId,
        question: String,
        options: Vec<PollOption>,
        duration_seconds: u32,
        /// Clients derive their countdown from these two, never from a local timer
        deadline: String,
        server_now: String,
    },
    PollResults {
        poll_id: PollId,
        options: Vec<OptionResult>,
        total_votes: u32,
    },
    PollClosed {
        poll_id: PollId,
        reason: CloseReason,
        options: Vec<OptionResult>,
        total_votes: u32,
    },
    VoteAck {
        poll_id: PollId,
        option: usize,
    },
    /// Sent only to the evicted participant, right before its connection is closed
    KickedOut,
    ParticipantsUpdate {
        identities: Vec<Identity>,
        participants: Vec<ParticipantInfo>,
    },
    ChatMessage {
        identity: Identity,
        text: String,
        sent_at: String,
    },
    SessionState {
        session: SessionSnapshot,
    },
    /// Non-fatal problem the client should know about (e.g. history not saved)
    Warning {
        code: String,
        msg: String,
    },
    Error {
        code: String,
        msg: String,
    },
}

/// Per-option result line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    pub ordinal: usize,
    pub text: String,
    pub votes: u32,
    /// `votes / totalVotes * 100`, 0 when nobody voted
    pub percentage: f64,
}

/// Public participant info (no connection handle)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub identity: Identity,
    pub role: Role,
}

impl From<&Participant> for ParticipantInfo {
    fn from(p: &Participant) -> Self {
        Self {
            identity: p.identity.clone(),
            role: p.role,
        }
    }
}

/// Immutable view of the session used for welcome/catch-up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Current or most recently closed poll
    pub poll: Option<Poll>,
    pub results: Vec<OptionResult>,
    pub total_votes: u32,
    pub participants: Vec<ParticipantInfo>,
    /// Whole seconds left on the open poll's countdown
    pub remaining_seconds: Option<u64>,
    pub server_now: String,
}
