use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type PollId = String;
pub type ConnectionId = String;
/// Display handle chosen by (or issued to) a participant
pub type Identity = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    /// Parse the `role` query parameter of a connection handshake
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub identity: Identity,
    pub role: Role,
    pub connection_id: ConnectionId,
    pub presence: Presence,
    /// ISO timestamp of the connect handshake
    pub joined_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Open,
    Closed,
}

/// One answer option; `ordinal` is its position and never changes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub ordinal: usize,
    pub text: String,
    /// Informational only, never affects the tally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

/// Option as sent by the teacher, before ordinals are assigned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionInput {
    pub text: String,
    #[serde(default)]
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    pub duration_seconds: u32,
    pub created_at: String,
    pub owner: Identity,
    pub state: PollState,
    /// When the countdown ends (ISO timestamp, display only)
    pub deadline: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub identity: Identity,
    pub poll_id: PollId,
    pub option: usize,
    pub ts: String,
}

/// Why a poll left the `open` state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    TimerExpired,
    AllVoted,
    ClosedByTeacher,
}
