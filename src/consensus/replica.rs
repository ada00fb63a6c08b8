//! The replica state machine: vote bookkeeping, phase transitions, and the
//! out-of-order deferral/retry loop.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::network::{Network, NetworkError};

use super::message::{Ballot, Block, InstanceId, Message, Phase, ReplicaId, Value, View};
use super::pending::PendingBuffer;
use super::store::CommitLog;
use super::votes::VoteSet;

/// Leader of `view` in a cluster of `cluster_size` replicas.
pub fn leader_of(view: View, cluster_size: usize) -> ReplicaId {
    view % cluster_size as ReplicaId
}

/// What [`Replica::process_message`] decided about a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The message advanced protocol state.
    Accepted,
    /// Structurally valid, but its pre-prepare has not arrived yet; parked
    /// and retried from the backlog.
    Deferred,
    /// Failed a precondition; logged and dropped, never retried.
    Rejected(Rejection),
}

/// Why a message failed its precondition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("pre-prepare sender {from} is not the leader of view {view}")]
    NotFromLeader { from: ReplicaId, view: View },
    #[error("block carries view {got}, current view is {want}")]
    WrongView { got: View, want: View },
    #[error("block carries instance {got}, current instance is {want}")]
    WrongInstance { got: InstanceId, want: InstanceId },
    #[error("pre-prepare for this block already recorded")]
    DuplicatePrePrepare,
    #[error("conflicting pre-prepare for the same view and instance")]
    ConflictingPrePrepare,
    #[error("duplicate {phase} vote from replica {from}")]
    DuplicateVote { phase: Phase, from: ReplicaId },
    #[error("shutdown sentinel from replica {from} was not self-addressed")]
    StrayShutdown { from: ReplicaId },
}

/// One consensus participant.
///
/// All protocol state is owned by the replica and only ever touched from its
/// own task; the shared [`Network`] is the sole channel between replicas.
pub struct Replica {
    id: ReplicaId,
    network: Arc<Network>,
    view: View,
    instance_id: InstanceId,
    /// The proposal currently on the table, if any.
    pre_prepared: Option<Block>,
    prepare_votes: VoteSet,
    commit_votes: VoteSet,
    pending_prepares: PendingBuffer,
    pending_commits: PendingBuffer,
    committed: CommitLog,
    /// Messages waiting to be retried by [`drain_backlog`](Self::drain_backlog).
    backlog: VecDeque<Message>,
}

impl Replica {
    pub fn new(id: ReplicaId, network: Arc<Network>) -> Self {
        Replica {
            id,
            network,
            view: 0,
            instance_id: 0,
            pre_prepared: None,
            prepare_votes: VoteSet::new(),
            commit_votes: VoteSet::new(),
            pending_prepares: PendingBuffer::new(),
            pending_commits: PendingBuffer::new(),
            committed: CommitLog::new(),
            backlog: VecDeque::new(),
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// The transport this replica is bound to.
    pub fn network(&self) -> Arc<Network> {
        Arc::clone(&self.network)
    }

    /// The blocks this replica has committed, one per instance.
    pub fn commit_log(&self) -> &CommitLog {
        &self.committed
    }

    /// Messages still parked in the retry backlog.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn block(&self, phase: Phase, value: Value) -> Block {
        Block::new(phase, self.view, self.instance_id, value)
    }

    /// A pre-prepare block for the current view and instance.
    pub fn pre_prepare_block(&self, value: Value) -> Block {
        self.block(Phase::PrePrepare, value)
    }

    /// A prepare block for the current view and instance.
    pub fn prepare_block(&self, value: Value) -> Block {
        self.block(Phase::Prepare, value)
    }

    /// A commit block for the current view and instance.
    pub fn commit_block(&self, value: Value) -> Block {
        self.block(Phase::Commit, value)
    }

    /// Point-to-point send to a single peer.
    pub fn send_to(&self, to: ReplicaId, block: Block) -> Result<(), NetworkError> {
        self.network.send(Message {
            from: self.id,
            to,
            block,
        })
    }

    /// Leader bootstrap: record our own pre-prepare, cast our own prepare
    /// vote, and put the proposal on the wire.
    pub fn propose_block(&mut self, block: Block) -> Result<(), NetworkError> {
        info!(replica = self.id, %block, "proposing");
        self.pre_prepared = Some(block);
        self.prepare_votes.record(block.ballot(), self.id);
        self.network.broadcast(self.id, block)
    }

    /// Apply one message to the state machine.
    ///
    /// Protocol-level failures come back as [`Outcome`]s; a transport error
    /// surfaces only when acceptance requires putting our own vote on the
    /// wire.
    pub fn process_message(&mut self, msg: &Message) -> Result<Outcome, NetworkError> {
        let outcome = match msg.block.phase {
            Phase::PrePrepare => self.on_pre_prepare(msg)?,
            Phase::Prepare => self.on_prepare(msg)?,
            Phase::Commit => self.on_commit(msg)?,
            Phase::Shutdown => Outcome::Rejected(Rejection::StrayShutdown { from: msg.from }),
        };
        match outcome {
            Outcome::Rejected(reason) => debug!(replica = self.id, %msg, %reason, "rejected"),
            Outcome::Deferred => debug!(replica = self.id, %msg, "deferred"),
            Outcome::Accepted => {}
        }
        Ok(outcome)
    }

    fn on_pre_prepare(&mut self, msg: &Message) -> Result<Outcome, NetworkError> {
        let block = msg.block;
        if block.view != self.view {
            return Ok(Outcome::Rejected(Rejection::WrongView {
                got: block.view,
                want: self.view,
            }));
        }
        if msg.from != leader_of(block.view, self.network.size()) {
            return Ok(Outcome::Rejected(Rejection::NotFromLeader {
                from: msg.from,
                view: block.view,
            }));
        }
        if block.instance_id != self.instance_id {
            return Ok(Outcome::Rejected(Rejection::WrongInstance {
                got: block.instance_id,
                want: self.instance_id,
            }));
        }
        if let Some(prev) = self.pre_prepared {
            // The slot is taken: either the same proposal again or an
            // equivocation on the same view and instance.
            if prev == block {
                return Ok(Outcome::Rejected(Rejection::DuplicatePrePrepare));
            }
            return Ok(Outcome::Rejected(Rejection::ConflictingPrePrepare));
        }

        debug!(replica = self.id, %block, "pre-prepare recorded");
        self.pre_prepared = Some(block);

        // Our own prepare vote, then the broadcast the peers are waiting on.
        let prepare = self.prepare_block(block.value);
        self.record_prepare_vote(self.id, prepare)?;
        self.network.broadcast(self.id, prepare)?;

        // Votes that arrived ahead of this pre-prepare can now be replayed.
        self.replay_parked(block.ballot())?;

        Ok(Outcome::Accepted)
    }

    fn on_prepare(&mut self, msg: &Message) -> Result<Outcome, NetworkError> {
        let block = msg.block;
        if block.view != self.view {
            return Ok(Outcome::Rejected(Rejection::WrongView {
                got: block.view,
                want: self.view,
            }));
        }
        if block.instance_id != self.instance_id {
            return Ok(Outcome::Rejected(Rejection::WrongInstance {
                got: block.instance_id,
                want: self.instance_id,
            }));
        }
        let ballot = block.ballot();
        if self.prepare_votes.has_voted(&ballot, msg.from) {
            return Ok(Outcome::Rejected(Rejection::DuplicateVote {
                phase: Phase::Prepare,
                from: msg.from,
            }));
        }
        if !self.matches_pre_prepared(ballot) {
            self.pending_prepares.park(*msg);
            return Ok(Outcome::Deferred);
        }
        self.record_prepare_vote(msg.from, block)?;
        Ok(Outcome::Accepted)
    }

    fn on_commit(&mut self, msg: &Message) -> Result<Outcome, NetworkError> {
        let block = msg.block;
        if block.view != self.view {
            return Ok(Outcome::Rejected(Rejection::WrongView {
                got: block.view,
                want: self.view,
            }));
        }
        if block.instance_id != self.instance_id {
            return Ok(Outcome::Rejected(Rejection::WrongInstance {
                got: block.instance_id,
                want: self.instance_id,
            }));
        }
        let ballot = block.ballot();
        if self.commit_votes.has_voted(&ballot, msg.from) {
            return Ok(Outcome::Rejected(Rejection::DuplicateVote {
                phase: Phase::Commit,
                from: msg.from,
            }));
        }
        if !self.matches_pre_prepared(ballot) {
            self.pending_commits.park(*msg);
            return Ok(Outcome::Deferred);
        }
        self.record_commit_vote(msg.from, block)?;
        Ok(Outcome::Accepted)
    }

    fn matches_pre_prepared(&self, ballot: Ballot) -> bool {
        self.pre_prepared.map(|block| block.ballot()) == Some(ballot)
    }

    /// Tally a prepare vote; crossing quorum starts our commit phase.
    fn record_prepare_vote(&mut self, voter: ReplicaId, block: Block) -> Result<(), NetworkError> {
        let ballot = block.ballot();
        if !self.prepare_votes.record(ballot, voter) {
            return Ok(());
        }
        let votes = self.prepare_votes.count(&ballot);
        let quorum = self.network.quorum_size();
        debug!(replica = self.id, %block, votes, quorum, "prepare vote recorded");
        // Votes arrive one at a time, so equality fires exactly once.
        if votes == quorum {
            info!(replica = self.id, %block, "prepare quorum reached");
            let commit = self.commit_block(block.value);
            self.record_commit_vote(self.id, commit)?;
            self.network.broadcast(self.id, commit)?;
        }
        Ok(())
    }

    /// Tally a commit vote; crossing quorum finalizes the instance.
    fn record_commit_vote(&mut self, voter: ReplicaId, block: Block) -> Result<(), NetworkError> {
        let ballot = block.ballot();
        if !self.commit_votes.record(ballot, voter) {
            return Ok(());
        }
        let votes = self.commit_votes.count(&ballot);
        let quorum = self.network.quorum_size();
        debug!(replica = self.id, %block, votes, quorum, "commit vote recorded");
        if votes >= quorum && self.committed.record(block.instance_id, block) {
            info!(
                replica = self.id,
                instance = block.instance_id,
                value = %block.value,
                "block committed"
            );
        }
        Ok(())
    }

    /// Drain both pending buffers for `ballot` and run the parked votes
    /// through the normal tally path.
    fn replay_parked(&mut self, ballot: Ballot) -> Result<(), NetworkError> {
        for msg in self.pending_prepares.drain(&ballot) {
            debug!(replica = self.id, %msg, "replaying parked prepare");
            self.process_message(&msg)?;
        }
        for msg in self.pending_commits.drain(&ballot) {
            debug!(replica = self.id, %msg, "replaying parked commit");
            self.process_message(&msg)?;
        }
        Ok(())
    }

    /// Sweep the backlog until a full pass makes no progress.
    ///
    /// Deferred messages rotate to the back and stay; accepted and rejected
    /// messages leave. Sweeping stops after the first pass with no
    /// acceptance, so a permanently unsatisfiable message cannot livelock
    /// the loop.
    pub fn drain_backlog(&mut self) -> Result<(), NetworkError> {
        loop {
            let mut accepted = false;
            let mut pass = std::mem::take(&mut self.backlog);
            while let Some(msg) = pass.pop_front() {
                match self.process_message(&msg)? {
                    Outcome::Accepted => accepted = true,
                    Outcome::Deferred => self.backlog.push_back(msg),
                    Outcome::Rejected(_) => {}
                }
            }
            if !accepted {
                break;
            }
        }
        Ok(())
    }

    /// The receive loop: pull a message, stash it at the head of the
    /// backlog, sweep.
    ///
    /// Exits on the self-addressed shutdown sentinel. Transport failures end
    /// the loop too: they mean the bus is gone, not that the protocol broke.
    pub async fn run(&mut self) {
        info!(replica = self.id, "started");
        loop {
            let msg = match self.network.recv(self.id).await {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(replica = self.id, %err, "receive failed, stopping");
                    break;
                }
            };
            if msg.block.phase == Phase::Shutdown && msg.from == self.id && msg.to == self.id {
                break;
            }
            debug!(replica = self.id, %msg, "received");
            self.backlog.push_front(msg);
            if let Err(err) = self.drain_backlog() {
                warn!(replica = self.id, %err, "send failed, stopping");
                break;
            }
        }
        info!(replica = self.id, "shutting down");
    }
}
