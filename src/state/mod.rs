pub mod history;
pub mod registry;
pub mod session;
pub mod tally;
pub mod timer;

use crate::broadcast::{BroadcastHub, Subscription};
use crate::config::AppConfig;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{ServerMessage, SessionSnapshot};
use crate::types::*;
use history::{append_with_retry, HistoryStore, MemoryHistoryStore, PollRecord};
use session::{ClosedPoll, Session};
use std::sync::Arc;
use timer::PollTimer;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Shared application state
///
/// Every mutating command takes the `session` lock for its whole duration,
/// so commands (including timer expiry) are applied one at a time. Events are
/// queued to the hub while the lock is held, which keeps per-connection order
/// equal to mutation order; queueing never waits on the network.
#[derive(Clone)]
pub struct AppState {
    session: Arc<Mutex<Session>>,
    pub hub: BroadcastHub,
    pub history: Arc<dyn HistoryStore>,
    pub config: Arc<AppConfig>,
    /// Background history appends not yet finished
    pending_writes: Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), Arc::new(MemoryHistoryStore::new()))
    }

    pub fn with_config(config: AppConfig, history: Arc<dyn HistoryStore>) -> Self {
        let session = Session::new(config.poll_limits(), config.chat_limiter());
        Self {
            session: Arc::new(Mutex::new(session)),
            hub: BroadcastHub::new(config.outbound_queue),
            history,
            config: Arc::new(config),
            pending_writes: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// Open the outbound side of a new connection
    pub fn connect(&self, role: Role) -> Subscription {
        self.hub.subscribe(role)
    }

    /// Register presence for `identity` on `connection_id`. Idempotent.
    pub async fn join(
        &self,
        identity: &str,
        role: Role,
        connection_id: &str,
    ) -> SessionResult<Participant> {
        let mut session = self.session.lock().await;
        let (participant, changed) = session
            .registry_mut()
            .join(identity, role, connection_id)?;

        self.hub
            .bind_identity(connection_id, &participant.identity);
        if changed {
            tracing::info!(
                identity = %participant.identity,
                role = ?participant.role,
                "Participant joined"
            );
            self.hub.broadcast(session.participants_update());
        }
        Ok(participant)
    }

    /// Connection went away. A clean close removes the participant, a
    /// transport fault only marks it disconnected so the handle can resume.
    pub async fn leave(&self, identity: &str, connection_id: &str, clean: bool) {
        let mut session = self.session.lock().await;
        if session.registry_mut().release_connection(connection_id) {
            tracing::debug!(identity, "Kicked connection closed, eviction released");
        }

        let changed = if clean {
            let removed = session.registry_mut().leave(identity, connection_id).is_some();
            if removed {
                session.forget_chat_history(identity);
            }
            removed
        } else {
            session
                .registry_mut()
                .mark_disconnected(identity, connection_id)
        };
        if !changed {
            return;
        }

        tracing::info!(identity, clean, "Participant left");
        self.hub.broadcast(session.participants_update());
        self.close_if_everyone_voted(&mut session);
    }

    /// Teacher opens a new poll and starts its countdown
    pub async fn create_poll(
        &self,
        teacher: &str,
        connection_id: &str,
        question: &str,
        options: Vec<OptionInput>,
        duration_seconds: u32,
    ) -> SessionResult<Poll> {
        let mut session = self.session.lock().await;
        session.registry().authorize(teacher, connection_id)?;

        let poll = session.create_poll(teacher, question, options, duration_seconds)?;

        let state = self.clone();
        let poll_id = poll.id.clone();
        session.arm_timer(PollTimer::start(duration_seconds, async move {
            state.expire_poll(&poll_id).await;
        }));

        tracing::info!(
            poll_id = %poll.id,
            owner = %poll.owner,
            options = poll.options.len(),
            duration_seconds,
            "Poll opened"
        );

        self.hub.broadcast(ServerMessage::PollCreated {
            poll_id: poll.id.clone(),
            question: poll.question.clone(),
            options: poll.options.clone(),
            duration_seconds: poll.duration_seconds,
            deadline: poll.deadline.clone(),
            server_now: chrono::Utc::now().to_rfc3339(),
        });
        if let Some(results) = session.results_message() {
            self.hub.broadcast(results);
        }

        Ok(poll)
    }

    /// Student answers the open poll
    pub async fn submit_vote(
        &self,
        identity: &str,
        connection_id: &str,
        poll_id: Option<&str>,
        option: usize,
    ) -> SessionResult<PollId> {
        let mut session = self.session.lock().await;
        session.registry().authorize(identity, connection_id)?;

        let everyone_voted = session.submit_vote(identity, poll_id, option)?;
        let open_id = session
            .current()
            .map(|p| p.poll.id.clone())
            .unwrap_or_default();
        tracing::debug!(identity, poll_id = %open_id, option, "Vote recorded");

        if let Some(results) = session.results_message() {
            self.hub.broadcast(results);
        }
        if everyone_voted {
            self.close_locked(&mut session, None, CloseReason::AllVoted);
        }

        Ok(open_id)
    }

    /// Administrative close. `Ok(false)` if nothing was open.
    pub async fn close_poll(&self, requester: &str, connection_id: &str) -> SessionResult<bool> {
        let mut session = self.session.lock().await;
        let participant = session.registry().authorize(requester, connection_id)?;
        if participant.role != Role::Teacher {
            return Err(SessionError::Forbidden(
                "Only the teacher can close polls".to_string(),
            ));
        }

        Ok(self
            .close_locked(&mut session, None, CloseReason::ClosedByTeacher)
            .is_some())
    }

    /// Timer expiry enters here, through the same lock as every other command
    pub async fn expire_poll(&self, poll_id: &str) {
        let mut session = self.session.lock().await;
        if self
            .close_locked(&mut session, Some(poll_id), CloseReason::TimerExpired)
            .is_none()
        {
            tracing::debug!(poll_id, "Timer expired for a poll that is no longer open");
        }
    }

    /// Teacher removes a participant
    pub async fn kick(
        &self,
        requester: &str,
        connection_id: &str,
        target: &str,
    ) -> SessionResult<Participant> {
        let mut session = self.session.lock().await;
        let requester_role = session.registry().authorize(requester, connection_id)?.role;

        let removed = session.kick(requester, requester_role, target)?;
        tracing::info!(kicked = target, by = requester, "Participant kicked");

        // kickedOut is queued before the queue is closed, so it still arrives
        self.hub
            .send_to_connection(&removed.connection_id, ServerMessage::KickedOut);
        self.hub.close_connection(&removed.connection_id);

        self.hub.broadcast(session.participants_update());
        self.close_if_everyone_voted(&mut session);
        Ok(removed)
    }

    /// Relay a chat line to everyone
    pub async fn send_chat(
        &self,
        identity: &str,
        connection_id: &str,
        text: &str,
    ) -> SessionResult<()> {
        let mut session = self.session.lock().await;
        session.registry().authorize(identity, connection_id)?;
        let text = session.check_chat(identity, text)?;

        self.hub.broadcast(ServerMessage::ChatMessage {
            identity: identity.to_string(),
            text,
            sent_at: chrono::Utc::now().to_rfc3339(),
        });
        Ok(())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    pub async fn history_for(&self, owner: &str) -> SessionResult<Vec<PollRecord>> {
        self.history.list_by_owner(owner).await
    }

    /// Wait for background history appends started so far
    pub async fn flush_history(&self) {
        let handles = std::mem::take(&mut *self.pending_writes.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("History task failed: {}", e);
            }
        }
    }

    fn close_if_everyone_voted(&self, session: &mut Session) {
        if session.all_students_voted() {
            self.close_locked(session, None, CloseReason::AllVoted);
        }
    }

    /// Close, announce, and hand the snapshot to the history store.
    /// Caller holds the session lock.
    fn close_locked(
        &self,
        session: &mut Session,
        poll_id: Option<&str>,
        reason: CloseReason,
    ) -> Option<ClosedPoll> {
        let closed = session.close(poll_id, reason)?;

        tracing::info!(
            poll_id = %closed.poll.id,
            reason = ?reason,
            total_votes = closed.total_votes,
            "Poll closed"
        );

        self.hub.broadcast(ServerMessage::PollClosed {
            poll_id: closed.poll.id.clone(),
            reason,
            options: closed.results.clone(),
            total_votes: closed.total_votes,
        });

        self.persist(PollRecord::from_results(&closed.poll, &closed.results));
        Some(closed)
    }

    fn persist(&self, record: PollRecord) {
        let history = self.history.clone();
        let hub = self.hub.clone();
        let policy = self.config.retry_policy();

        let handle = tokio::spawn(async move {
            if let Err(e) = append_with_retry(history.as_ref(), &record, policy).await {
                tracing::error!(
                    poll_id = %record.id,
                    owner = %record.owner_identity,
                    "Giving up on saving poll to history: {}",
                    e
                );
                hub.send_to_identity(
                    &record.owner_identity,
                    ServerMessage::Warning {
                        code: e.code().to_string(),
                        msg: format!("Poll \"{}\" was not saved to history", record.question),
                    },
                );
            }
        });

        let mut pending = self.pending_writes.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
