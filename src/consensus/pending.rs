use std::collections::BTreeMap;

use super::message::{Ballot, Message};

/// Parking space for votes that arrived ahead of their pre-prepare.
///
/// Holds at most one message per sender per ballot, so a message retried
/// from the backlog cannot grow the buffer while its dependency is still
/// missing.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    parked: BTreeMap<Ballot, Vec<Message>>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `msg` under its block's ballot. Returns false if this sender
    /// already has a message parked there.
    pub fn park(&mut self, msg: Message) -> bool {
        let queue = self.parked.entry(msg.block.ballot()).or_default();
        if queue.iter().any(|parked| parked.from == msg.from) {
            return false;
        }
        queue.push(msg);
        true
    }

    /// Remove and return everything parked under `ballot`, in arrival order.
    pub fn drain(&mut self, ballot: &Ballot) -> Vec<Message> {
        self.parked.remove(ballot).unwrap_or_default()
    }

    /// Total parked messages across all ballots.
    pub fn len(&self) -> usize {
        self.parked.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}
