//! Participant registry: who is in the session, in which role, over which connection.

use crate::error::{SessionError, SessionResult};
use crate::types::*;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Registry {
    participants: HashMap<Identity, Participant>,
    /// Kicked identities and the connection they were kicked from.
    /// Cleared by a join from another connection, or once that connection is gone.
    evicted: HashMap<Identity, ConnectionId>,
}

/// Longest accepted display handle
pub const MAX_IDENTITY_CHARS: usize = 64;

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity` on `connection_id`.
    ///
    /// Joining again from the same connection is a no-op. A handle that is
    /// live on another connection is refused; one left behind by a dropped
    /// connection is taken over. An evicted handle is refused on the
    /// connection it was kicked from.
    pub fn join(
        &mut self,
        identity: &str,
        role: Role,
        connection_id: &str,
    ) -> SessionResult<(Participant, bool)> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(SessionError::Validation(
                "Display name cannot be empty".to_string(),
            ));
        }
        if identity.chars().count() > MAX_IDENTITY_CHARS {
            return Err(SessionError::Validation(format!(
                "Display name is longer than {} characters",
                MAX_IDENTITY_CHARS
            )));
        }

        if self.evicted.get(identity).map(String::as_str) == Some(connection_id) {
            return Err(SessionError::Forbidden(format!(
                "{} was removed from this session",
                identity
            )));
        }

        if let Some(existing) = self.participants.get_mut(identity) {
            if existing.connection_id == connection_id {
                return Ok((existing.clone(), false));
            }
            if existing.presence == Presence::Connected {
                return Err(SessionError::Conflict(format!(
                    "{} is already connected",
                    identity
                )));
            }
            if existing.role != role {
                return Err(SessionError::Forbidden(format!(
                    "{} rejoined with a different role",
                    identity
                )));
            }
            existing.connection_id = connection_id.to_string();
            existing.presence = Presence::Connected;
            tracing::info!(identity, "Participant reconnected");
            return Ok((existing.clone(), true));
        }

        if self.evicted.remove(identity).is_some() {
            tracing::info!(identity, "Evicted participant rejoined with a new handshake");
        }

        let participant = Participant {
            identity: identity.to_string(),
            role,
            connection_id: connection_id.to_string(),
            presence: Presence::Connected,
            joined_at: chrono::Utc::now().to_rfc3339(),
        };
        self.participants
            .insert(participant.identity.clone(), participant.clone());
        Ok((participant, true))
    }

    /// Make sure `identity` is live on `connection_id` before it may act
    pub fn authorize(&self, identity: &str, connection_id: &str) -> SessionResult<&Participant> {
        if self.evicted.contains_key(identity) {
            return Err(SessionError::Forbidden(
                "You have been removed from this session".to_string(),
            ));
        }
        match self.participants.get(identity) {
            Some(p) if p.connection_id == connection_id && p.presence == Presence::Connected => {
                Ok(p)
            }
            Some(_) => Err(SessionError::Forbidden(format!(
                "{} is connected elsewhere",
                identity
            ))),
            None => Err(SessionError::Validation(
                "Join the session first".to_string(),
            )),
        }
    }

    /// Clean disconnect. Only the connection that owns the identity may remove it.
    pub fn leave(&mut self, identity: &str, connection_id: &str) -> Option<Participant> {
        match self.participants.get(identity) {
            Some(p) if p.connection_id == connection_id => self.participants.remove(identity),
            _ => None,
        }
    }

    /// Transport fault: keep the entry so the handle can be resumed
    pub fn mark_disconnected(&mut self, identity: &str, connection_id: &str) -> bool {
        match self.participants.get_mut(identity) {
            Some(p) if p.connection_id == connection_id && p.presence == Presence::Connected => {
                p.presence = Presence::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Remove and mark evicted
    pub fn evict(&mut self, identity: &str) -> SessionResult<Participant> {
        let participant = self.participants.remove(identity).ok_or_else(|| {
            SessionError::Validation(format!("No participant named {}", identity))
        })?;
        self.evicted
            .insert(identity.to_string(), participant.connection_id.clone());
        Ok(participant)
    }

    pub fn is_evicted(&self, identity: &str) -> bool {
        self.evicted.contains_key(identity)
    }

    /// Forget evictions tied to a connection that has gone away.
    /// Connection ids are never reused, so nothing can rejoin on it.
    pub fn release_connection(&mut self, connection_id: &str) -> bool {
        let before = self.evicted.len();
        self.evicted.retain(|_, conn| conn.as_str() != connection_id);
        self.evicted.len() != before
    }

    /// Drop participants whose transport failed; returns their identities
    pub fn prune_disconnected(&mut self) -> Vec<Identity> {
        let gone: Vec<Identity> = self
            .participants
            .values()
            .filter(|p| p.presence == Presence::Disconnected)
            .map(|p| p.identity.clone())
            .collect();
        for identity in &gone {
            self.participants.remove(identity);
        }
        gone
    }

    pub fn get(&self, identity: &str) -> Option<&Participant> {
        self.participants.get(identity)
    }

    /// Connected participants, in join order
    pub fn connected(&self) -> Vec<&Participant> {
        let mut list: Vec<_> = self
            .participants
            .values()
            .filter(|p| p.presence == Presence::Connected)
            .collect();
        list.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        list
    }

    pub fn connected_students(&self) -> impl Iterator<Item = &Identity> {
        self.participants
            .values()
            .filter(|p| p.role == Role::Student && p.presence == Presence::Connected)
            .map(|p| &p.identity)
    }
}

#[cfg(test)]
impl Registry {
    fn len(&self) -> usize {
        self.participants.len()
    }

    fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
