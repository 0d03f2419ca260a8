//! Poll lifecycle rules.
//!
//! Plain synchronous state; `AppState` wraps it in the one mutex every
//! command goes through, and does the fan-out and persistence around it.

use super::registry::Registry;
use super::tally::Tally;
use super::timer::PollTimer;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{OptionResult, ParticipantInfo, ServerMessage, SessionSnapshot};
use crate::ratelimit::RateLimiter;
use crate::types::*;

/// Bounds applied to `createPoll` and chat text
#[derive(Debug, Clone, Copy)]
pub struct PollLimits {
    pub max_options: usize,
    pub max_text_chars: usize,
    pub max_duration_seconds: u32,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            max_options: 10,
            max_text_chars: 500,
            max_duration_seconds: 600,
        }
    }
}

/// The current (or most recently closed) poll together with its votes
#[derive(Debug)]
pub struct ActivePoll {
    pub poll: Poll,
    pub tally: Tally,
}

impl ActivePoll {
    pub fn is_open(&self) -> bool {
        self.poll.state == PollState::Open
    }

    pub fn results(&self) -> Vec<OptionResult> {
        self.tally.results(&self.poll.options)
    }
}

/// Snapshot of a poll taken at the moment it closed
#[derive(Debug, Clone)]
pub struct ClosedPoll {
    pub poll: Poll,
    pub results: Vec<OptionResult>,
    pub total_votes: u32,
    pub reason: CloseReason,
}

#[derive(Debug, Default)]
pub struct Session {
    registry: Registry,
    current: Option<ActivePoll>,
    timer: Option<PollTimer>,
    limits: PollLimits,
    chat_limiter: Option<RateLimiter>,
}

impl Session {
    pub fn new(limits: PollLimits, chat_limiter: Option<RateLimiter>) -> Self {
        Self {
            limits,
            chat_limiter,
            ..Default::default()
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn current(&self) -> Option<&ActivePoll> {
        self.current.as_ref()
    }

    pub fn open_poll(&self) -> Option<&ActivePoll> {
        self.current.as_ref().filter(|p| p.is_open())
    }

    /// Open a new poll owned by `teacher`
    pub fn create_poll(
        &mut self,
        teacher: &str,
        question: &str,
        options: Vec<OptionInput>,
        duration_seconds: u32,
    ) -> SessionResult<Poll> {
        match self.registry.get(teacher) {
            Some(p) if p.role == Role::Teacher => {}
            _ => {
                return Err(SessionError::Forbidden(
                    "Only a teacher can create polls".to_string(),
                ))
            }
        }

        if let Some(open) = self.open_poll() {
            return Err(SessionError::Conflict(format!(
                "Poll \"{}\" is still open",
                open.poll.question
            )));
        }

        let (question, options) = self.validate_poll(question, options, duration_seconds)?;

        let now = chrono::Utc::now();
        let deadline = now + chrono::Duration::seconds(i64::from(duration_seconds));
        let poll = Poll {
            id: ulid::Ulid::new().to_string(),
            question,
            options,
            duration_seconds,
            created_at: now.to_rfc3339(),
            owner: teacher.to_string(),
            state: PollState::Open,
            deadline: deadline.to_rfc3339(),
        };

        self.current = Some(ActivePoll {
            tally: Tally::new(poll.id.clone(), poll.options.len()),
            poll: poll.clone(),
        });

        Ok(poll)
    }

    fn validate_poll(
        &self,
        question: &str,
        options: Vec<OptionInput>,
        duration_seconds: u32,
    ) -> SessionResult<(String, Vec<PollOption>)> {
        let limits = &self.limits;
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::Validation(
                "Question cannot be empty".to_string(),
            ));
        }
        if question.chars().count() > limits.max_text_chars {
            return Err(SessionError::Validation(format!(
                "Question is longer than {} characters",
                limits.max_text_chars
            )));
        }
        if options.len() < 2 {
            return Err(SessionError::Validation(
                "At least two options are required".to_string(),
            ));
        }
        if options.len() > limits.max_options {
            return Err(SessionError::Validation(format!(
                "At most {} options are allowed",
                limits.max_options
            )));
        }
        if duration_seconds == 0 || duration_seconds > limits.max_duration_seconds {
            return Err(SessionError::Validation(format!(
                "Duration must be between 1 and {} seconds",
                limits.max_duration_seconds
            )));
        }

        let mut out = Vec::with_capacity(options.len());
        for (ordinal, option) in options.into_iter().enumerate() {
            let text = option.text.trim();
            if text.is_empty() {
                return Err(SessionError::Validation(
                    "All options must have text".to_string(),
                ));
            }
            if text.chars().count() > limits.max_text_chars {
                return Err(SessionError::Validation(format!(
                    "Option {} is longer than {} characters",
                    ordinal + 1,
                    limits.max_text_chars
                )));
            }
            out.push(PollOption {
                ordinal,
                text: text.to_string(),
                is_correct: option.is_correct,
            });
        }

        Ok((question.to_string(), out))
    }

    /// Attach the countdown for the poll that was just opened
    pub fn arm_timer(&mut self, timer: PollTimer) {
        if let Some(previous) = self.timer.replace(timer) {
            tracing::warn!("Replacing a poll timer that was still armed");
            previous.cancel();
        }
    }

    /// Record a student's vote. Returns whether every connected student has
    /// now voted.
    pub fn submit_vote(
        &mut self,
        identity: &str,
        poll_id: Option<&str>,
        ordinal: usize,
    ) -> SessionResult<bool> {
        match self.registry.get(identity) {
            Some(p) if p.role == Role::Student => {}
            _ => {
                return Err(SessionError::Forbidden(
                    "Only students can vote".to_string(),
                ))
            }
        }

        let active = match self.current.as_mut() {
            Some(active) if active.is_open() => active,
            _ => return Err(SessionError::NotOpen("No poll is open".to_string())),
        };
        if let Some(poll_id) = poll_id {
            if poll_id != active.poll.id {
                return Err(SessionError::NotOpen(
                    "That poll is no longer open".to_string(),
                ));
            }
        }

        active.tally.record(identity, ordinal)?;
        Ok(self.all_students_voted())
    }

    /// True when a poll is open, at least one student is connected, and every
    /// connected student has voted
    pub fn all_students_voted(&self) -> bool {
        let Some(active) = self.open_poll() else {
            return false;
        };
        let mut students = self.registry.connected_students().peekable();
        if students.peek().is_none() {
            return false;
        }
        students.all(|s| active.tally.has_voted(s))
    }

    /// Close the open poll. Idempotent: returns `None` if nothing matching is open.
    pub fn close(&mut self, poll_id: Option<&str>, reason: CloseReason) -> Option<ClosedPoll> {
        let active = self.current.as_mut()?;
        if !active.is_open() {
            return None;
        }
        if let Some(poll_id) = poll_id {
            if poll_id != active.poll.id {
                return None;
            }
        }

        active.poll.state = PollState::Closed;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }

        let closed = ClosedPoll {
            poll: active.poll.clone(),
            results: active.results(),
            total_votes: active.tally.total(),
            reason,
        };

        // Handles held for dropped connections only last until the poll ends
        for identity in self.registry.prune_disconnected() {
            tracing::debug!(identity = %identity, "Released disconnected participant");
            self.forget_chat_history(&identity);
        }
        Some(closed)
    }

    /// Remove `target` on behalf of `requester`
    pub fn kick(
        &mut self,
        requester: &str,
        requester_role: Role,
        target: &str,
    ) -> SessionResult<Participant> {
        if requester_role != Role::Teacher {
            return Err(SessionError::Forbidden(
                "Only the teacher can remove participants".to_string(),
            ));
        }
        if requester == target {
            return Err(SessionError::Validation(
                "You cannot remove yourself".to_string(),
            ));
        }

        let participant = self.registry.evict(target)?;
        if let Some(limiter) = self.chat_limiter.as_mut() {
            limiter.forget(target);
        }
        Ok(participant)
    }

    /// Validate a chat line and apply the flood limit
    pub fn check_chat(&mut self, identity: &str, text: &str) -> SessionResult<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::Validation(
                "Message cannot be empty".to_string(),
            ));
        }
        if text.chars().count() > self.limits.max_text_chars {
            return Err(SessionError::Validation(format!(
                "Message is longer than {} characters",
                self.limits.max_text_chars
            )));
        }
        if let Some(limiter) = self.chat_limiter.as_mut() {
            if !limiter.check(identity) {
                return Err(SessionError::Validation(
                    "You are sending messages too fast, slow down".to_string(),
                ));
            }
        }
        Ok(text.to_string())
    }

    pub fn forget_chat_history(&mut self, identity: &str) {
        if let Some(limiter) = self.chat_limiter.as_mut() {
            limiter.forget(identity);
        }
    }

    pub fn timer_remaining_secs(&self) -> Option<u64> {
        self.timer.as_ref().map(|t| t.remaining_secs())
    }

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.registry
            .connected()
            .into_iter()
            .map(ParticipantInfo::from)
            .collect()
    }

    pub fn participants_update(&self) -> ServerMessage {
        let participants = self.participants();
        ServerMessage::ParticipantsUpdate {
            identities: participants.iter().map(|p| p.identity.clone()).collect(),
            participants,
        }
    }

    /// Current tally as a `pollResults` event
    pub fn results_message(&self) -> Option<ServerMessage> {
        let active = self.current.as_ref()?;
        Some(ServerMessage::PollResults {
            poll_id: active.poll.id.clone(),
            options: active.results(),
            total_votes: active.tally.total(),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (poll, results, total_votes) = match &self.current {
            Some(active) => (
                Some(active.poll.clone()),
                active.results(),
                active.tally.total(),
            ),
            None => (None, Vec::new(), 0),
        };
        SessionSnapshot {
            poll,
            results,
            total_votes,
            participants: self.participants(),
            remaining_seconds: self.open_poll().and(self.timer_remaining_secs()),
            server_now: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(texts: &[&str]) -> Vec<OptionInput> {
        texts
            .iter()
            .map(|t| OptionInput {
                text: t.to_string(),
                is_correct: None,
            })
            .collect()
    }

    fn session_with(students: &[&str]) -> Session {
        let mut session = Session::default();
        session
            .registry_mut()
            .join("teacher-1", Role::Teacher, "conn-t")
            .unwrap();
        for (i, s) in students.iter().enumerate() {
            session
                .registry_mut()
                .join(s, Role::Student, &format!("conn-{}", i))
                .unwrap();
        }
        session
    }

    #[test]
    fn test_create_poll_assigns_ordinals() {
        let mut session = session_with(&[]);
        let poll = session
            .create_poll("teacher-1", "Is Go statically typed?", opts(&["Yes", "No"]), 30)
            .unwrap();

        assert_eq!(poll.state, PollState::Open);
        assert_eq!(poll.owner, "teacher-1");
        assert_eq!(poll.options[0].ordinal, 0);
        assert_eq!(poll.options[1].ordinal, 1);
        assert_eq!(poll.options[1].text, "No");
        assert!(session.open_poll().is_some());
    }

    #[test]
    fn test_create_poll_validation() {
        let mut session = session_with(&[]);

        let cases = vec![
            ("", opts(&["a", "b"]), 30),
            ("q", opts(&["only"]), 30),
            ("q", opts(&["a", "  "]), 30),
            ("q", opts(&["a", "b"]), 0),
            ("q", opts(&["a", "b"]), 601),
        ];
        for (question, options, duration) in cases {
            let result = session.create_poll("teacher-1", question, options, duration);
            assert!(
                matches!(result, Err(SessionError::Validation(_))),
                "expected validation error for {:?}",
                question
            );
        }
        assert!(session.current().is_none());
    }

    #[test]
    fn test_correct_flag_is_optional() {
        let mut session = session_with(&[]);
        let mut options = opts(&["a", "b"]);
        options[1].is_correct = Some(false);
        let poll = session.create_poll("teacher-1", "q", options, 10).unwrap();
        assert_eq!(poll.options[0].is_correct, None);
        assert_eq!(poll.options[1].is_correct, Some(false));
    }

    #[test]
    fn test_student_cannot_create_poll() {
        let mut session = session_with(&["alice"]);
        let result = session.create_poll("alice", "q", opts(&["a", "b"]), 10);
        assert!(matches!(result, Err(SessionError::Forbidden(_))));
    }

    #[test]
    fn test_conflict_while_open_then_ok_after_close() {
        let mut session = session_with(&["alice"]);
        session
            .create_poll("teacher-1", "q1", opts(&["a", "b"]), 10)
            .unwrap();

        let result = session.create_poll("teacher-1", "q2", opts(&["a", "b"]), 10);
        assert!(matches!(result, Err(SessionError::Conflict(_))));

        let closed = session.close(None, CloseReason::TimerExpired).unwrap();
        assert_eq!(closed.poll.question, "q1");
        assert!(session
            .create_poll("teacher-1", "q2", opts(&["a", "b"]), 10)
            .is_ok());
    }

    #[test]
    fn test_vote_rules() {
        let mut session = session_with(&["alice", "bob"]);

        assert!(matches!(
            session.submit_vote("alice", None, 0),
            Err(SessionError::NotOpen(_))
        ));

        let poll = session
            .create_poll("teacher-1", "q", opts(&["a", "b"]), 10)
            .unwrap();

        assert!(matches!(
            session.submit_vote("teacher-1", None, 0),
            Err(SessionError::Forbidden(_))
        ));
        assert!(matches!(
            session.submit_vote("alice", None, 7),
            Err(SessionError::UnknownOption { .. })
        ));
        assert!(matches!(
            session.submit_vote("alice", Some("stale-poll"), 0),
            Err(SessionError::NotOpen(_))
        ));

        assert_eq!(session.submit_vote("alice", Some(poll.id.as_str()), 1), Ok(false));
        assert!(matches!(
            session.submit_vote("alice", None, 0),
            Err(SessionError::DuplicateVote { .. })
        ));
        assert_eq!(session.current().unwrap().tally.counts(), &[0, 1]);

        // bob is the last one
        assert_eq!(session.submit_vote("bob", None, 0), Ok(true));
    }

    #[test]
    fn test_vote_after_close_is_rejected() {
        let mut session = session_with(&["alice", "bob"]);
        session
            .create_poll("teacher-1", "q", opts(&["a", "b"]), 10)
            .unwrap();
        session.close(None, CloseReason::TimerExpired).unwrap();

        assert!(matches!(
            session.submit_vote("alice", None, 0),
            Err(SessionError::NotOpen(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = session_with(&[]);
        let poll = session
            .create_poll("teacher-1", "q", opts(&["a", "b"]), 10)
            .unwrap();

        assert!(session.close(Some("other"), CloseReason::TimerExpired).is_none());
        let closed = session
            .close(Some(poll.id.as_str()), CloseReason::TimerExpired)
            .unwrap();
        assert_eq!(closed.total_votes, 0);
        assert!(closed.results.iter().all(|r| r.votes == 0 && r.percentage == 0.0));

        assert!(session.close(None, CloseReason::ClosedByTeacher).is_none());
        assert!(session.close(Some(poll.id.as_str()), CloseReason::TimerExpired).is_none());
        assert_eq!(session.current().unwrap().poll.state, PollState::Closed);
    }

    #[test]
    fn test_close_releases_disconnected_participants() {
        let mut session = session_with(&["alice", "bob"]);
        session
            .create_poll("teacher-1", "q", opts(&["a", "b"]), 10)
            .unwrap();
        assert!(session.registry_mut().mark_disconnected("bob", "conn-1"));
        assert!(session.registry().get("bob").is_some());

        session.close(None, CloseReason::ClosedByTeacher).unwrap();
        assert!(session.registry().get("bob").is_none());
        assert!(session.registry().get("alice").is_some());

        // The handle is free again for anyone
        assert!(session
            .registry_mut()
            .join("bob", Role::Student, "conn-9")
            .is_ok());
    }

    #[test]
    fn test_kick_requires_teacher() {
        let mut session = session_with(&["alice", "bob"]);

        assert!(matches!(
            session.kick("alice", Role::Student, "bob"),
            Err(SessionError::Forbidden(_))
        ));
        assert!(matches!(
            session.kick("teacher-1", Role::Teacher, "teacher-1"),
            Err(SessionError::Validation(_))
        ));

        let removed = session.kick("teacher-1", Role::Teacher, "bob").unwrap();
        assert_eq!(removed.identity, "bob");
        assert!(session.registry().is_evicted("bob"));
        assert_eq!(session.participants().len(), 2);
    }

    #[test]
    fn test_kicking_last_non_voter_completes_participation() {
        let mut session = session_with(&["alice", "bob"]);
        session
            .create_poll("teacher-1", "q", opts(&["a", "b"]), 10)
            .unwrap();
        assert_eq!(session.submit_vote("alice", None, 0), Ok(false));
        assert!(!session.all_students_voted());

        session.kick("teacher-1", Role::Teacher, "bob").unwrap();
        assert!(session.all_students_voted());
    }

    #[test]
    fn test_no_students_never_counts_as_all_voted() {
        let mut session = session_with(&[]);
        session
            .create_poll("teacher-1", "q", opts(&["a", "b"]), 10)
            .unwrap();
        assert!(!session.all_students_voted());
    }

    #[test]
    fn test_chat_checks() {
        let mut session = Session::new(
            PollLimits::default(),
            Some(RateLimiter::new(2, std::time::Duration::from_secs(60))),
        );
        assert!(matches!(
            session.check_chat("alice", "   "),
            Err(SessionError::Validation(_))
        ));
        assert_eq!(session.check_chat("alice", " hi ").unwrap(), "hi");
        assert!(session.check_chat("alice", "again").is_ok());
        assert!(session.check_chat("alice", "spam").is_err());
        assert!(session.check_chat("bob", "hello").is_ok());
    }
}
