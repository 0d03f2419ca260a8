use crate::error::{SessionError, SessionResult};
use crate::protocol::OptionResult;
use crate::types::{Identity, PollId, PollOption, Vote};
use std::collections::HashMap;

/// Vote counts for one poll plus the votes that produced them
#[derive(Debug, Clone, Default)]
pub struct Tally {
    poll_id: PollId,
    counts: Vec<u32>,
    votes: HashMap<Identity, Vote>,
}

impl Tally {
    pub fn new(poll_id: impl Into<PollId>, option_count: usize) -> Self {
        Self {
            poll_id: poll_id.into(),
            counts: vec![0; option_count],
            votes: HashMap::new(),
        }
    }

    /// Record a vote; the first vote of an identity wins
    pub fn record(&mut self, identity: &str, ordinal: usize) -> SessionResult<()> {
        if ordinal >= self.counts.len() {
            return Err(SessionError::UnknownOption {
                ordinal,
                available: self.counts.len(),
            });
        }
        if self.votes.contains_key(identity) {
            return Err(SessionError::DuplicateVote {
                identity: identity.to_string(),
            });
        }

        self.votes.insert(
            identity.to_string(),
            Vote {
                identity: identity.to_string(),
                poll_id: self.poll_id.clone(),
                option: ordinal,
                ts: chrono::Utc::now().to_rfc3339(),
            },
        );
        self.counts[ordinal] += 1;
        Ok(())
    }

    pub fn has_voted(&self, identity: &str) -> bool {
        self.votes.contains_key(identity)
    }

    #[cfg(test)]
    fn vote_of(&self, identity: &str) -> Option<&Vote> {
        self.votes.get(identity)
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// Share of the vote per option in percent; all zeros when nobody voted
    pub fn percentages(&self) -> Vec<f64> {
        let total = self.total();
        self.counts
            .iter()
            .map(|&count| {
                if total == 0 {
                    0.0
                } else {
                    count as f64 / total as f64 * 100.0
                }
            })
            .collect()
    }

    /// Result lines in option order
    pub fn results(&self, options: &[PollOption]) -> Vec<OptionResult> {
        let percentages = self.percentages();
        options
            .iter()
            .map(|option| OptionResult {
                ordinal: option.ordinal,
                text: option.text.clone(),
                votes: self.counts.get(option.ordinal).copied().unwrap_or(0),
                percentage: percentages.get(option.ordinal).copied().unwrap_or(0.0),
            })
            .collect()
    }
}
