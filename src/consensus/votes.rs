use std::collections::{BTreeMap, BTreeSet};

use super::message::{Ballot, ReplicaId};

/// Grow-only, idempotent vote bookkeeping, one voter set per ballot.
///
/// Keys carry no phase, so a pre-prepare and the prepares cast for the same
/// value tally against a single ballot instead of fragmenting across
/// phase-tagged copies of the block.
#[derive(Debug, Default)]
pub struct VoteSet {
    votes: BTreeMap<Ballot, BTreeSet<ReplicaId>>,
}

impl VoteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `voter` for `ballot`. Returns false if that vote was already
    /// present.
    pub fn record(&mut self, ballot: Ballot, voter: ReplicaId) -> bool {
        self.votes.entry(ballot).or_default().insert(voter)
    }

    /// Whether `voter` has already voted for `ballot`.
    pub fn has_voted(&self, ballot: &Ballot, voter: ReplicaId) -> bool {
        self.votes
            .get(ballot)
            .is_some_and(|voters| voters.contains(&voter))
    }

    /// Number of distinct voters recorded for `ballot`.
    pub fn count(&self, ballot: &Ballot) -> usize {
        self.votes.get(ballot).map_or(0, |voters| voters.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::message::Value;

    fn ballot(value: u32) -> Ballot {
        Ballot {
            view: 0,
            instance_id: 0,
            value: Value(value),
        }
    }

    #[test]
    fn voting_is_idempotent() {
        let mut votes = VoteSet::new();
        assert!(votes.record(ballot(1), 2));
        assert!(!votes.record(ballot(1), 2));
        assert_eq!(votes.count(&ballot(1)), 1);
        assert!(votes.has_voted(&ballot(1), 2));
    }

    #[test]
    fn ballots_tally_independently() {
        let mut votes = VoteSet::new();
        votes.record(ballot(1), 0);
        votes.record(ballot(1), 1);
        votes.record(ballot(2), 0);
        assert_eq!(votes.count(&ballot(1)), 2);
        assert_eq!(votes.count(&ballot(2)), 1);
        assert_eq!(votes.count(&ballot(3)), 0);
        assert!(!votes.has_voted(&ballot(2), 1));
    }
}
