use std::cmp::Ordering;
use std::fmt;

pub type ReplicaId = u32;
pub type View = u32;
pub type InstanceId = u32;

/// The opaque payload under agreement.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Value(pub u32);

/// The protocol step that produced a block.
///
/// This tags the message, not the agreed value: every phase transition
/// produces a new block with a different phase over the same value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Phase {
    PrePrepare,
    Prepare,
    Commit,
    /// Teardown sentinel a replica sends to itself to unblock its receive
    /// loop. Never part of agreement.
    Shutdown,
}

/// The unit of agreement.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Block {
    pub phase: Phase,
    pub view: View,
    pub instance_id: InstanceId,
    pub value: Value,
}

impl Block {
    pub fn new(phase: Phase, view: View, instance_id: InstanceId, value: Value) -> Self {
        Block {
            phase,
            view,
            instance_id,
            value,
        }
    }

    /// The phase-free projection used as the vote key: one logical ballot
    /// per agreed value, no matter which phase carried it.
    pub fn ballot(&self) -> Ballot {
        Ballot {
            view: self.view,
            instance_id: self.instance_id,
            value: self.value,
        }
    }
}

impl Ord for Block {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.view, self.instance_id, self.phase, self.value).cmp(&(
            other.view,
            other.instance_id,
            other.phase,
            other.value,
        ))
    }
}

impl PartialOrd for Block {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One slot on one value within one leader epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Ballot {
    pub view: View,
    pub instance_id: InstanceId,
    pub value: Value,
}

/// Envelope carried by the transport.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Message {
    pub from: ReplicaId,
    pub to: ReplicaId,
    pub block: Block,
}

impl Message {
    /// The self-addressed sentinel that ends a replica's receive loop.
    pub fn shutdown(id: ReplicaId) -> Self {
        Message {
            from: id,
            to: id,
            block: Block::new(Phase::Shutdown, 0, 0, Value(0)),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::PrePrepare => "PRE_PREPARE",
            Phase::Prepare => "PREPARE",
            Phase::Commit => "COMMIT",
            Phase::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block{{type={}, view={}, instance_id={}, value={}}}",
            self.phase, self.view, self.instance_id, self.value
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message{{to={}, from={}, block={}}}",
            self.to, self.from, self.block
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_order_by_view_instance_phase_value() {
        let base = Block::new(Phase::Prepare, 1, 1, Value(5));
        assert!(Block::new(Phase::Shutdown, 0, 9, Value(9)) < base);
        assert!(Block::new(Phase::Shutdown, 1, 0, Value(9)) < base);
        assert!(Block::new(Phase::PrePrepare, 1, 1, Value(9)) < base);
        assert!(Block::new(Phase::Prepare, 1, 1, Value(4)) < base);
        assert!(Block::new(Phase::Prepare, 1, 1, Value(6)) > base);
    }

    #[test]
    fn ballot_ignores_phase() {
        let prepare = Block::new(Phase::Prepare, 0, 3, Value(67));
        let commit = Block::new(Phase::Commit, 0, 3, Value(67));
        assert_eq!(prepare.ballot(), commit.ballot());
        assert_ne!(
            prepare.ballot(),
            Block::new(Phase::Prepare, 0, 3, Value(68)).ballot()
        );
    }

    #[test]
    fn shutdown_sentinel_is_self_addressed() {
        let sentinel = Message::shutdown(3);
        assert_eq!(sentinel.from, 3);
        assert_eq!(sentinel.to, 3);
        assert_eq!(sentinel.block.phase, Phase::Shutdown);
    }

    #[test]
    fn display_matches_wire_names() {
        let block = Block::new(Phase::PrePrepare, 0, 0, Value(67));
        assert_eq!(
            block.to_string(),
            "Block{type=PRE_PREPARE, view=0, instance_id=0, value=67}"
        );
        let msg = Message {
            from: 0,
            to: 2,
            block,
        };
        assert_eq!(
            msg.to_string(),
            "Message{to=2, from=0, block=Block{type=PRE_PREPARE, view=0, instance_id=0, value=67}}"
        );
    }
}
