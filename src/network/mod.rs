//! In-process message bus: one FIFO mailbox per replica.
//!
//! Delivery between any fixed sender/receiver pair is ordered; there is no
//! ordering across different pairs, which is exactly the reordering the
//! replica state machine's deferral path exists to absorb.

pub mod quorum;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::consensus::message::{Block, Message, ReplicaId};

pub use quorum::{fault_tolerance, quorum_size, MIN_REPLICAS};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("cluster of {0} replicas is below the minimum of {min}", min = MIN_REPLICAS)]
    ClusterTooSmall(usize),
    #[error("replica id {0} is outside the cluster")]
    UnknownRecipient(ReplicaId),
    #[error("mailbox for replica {0} is closed")]
    MailboxClosed(ReplicaId),
}

/// One replica's inbox. The sending half is shared by every peer; the
/// receiving half is locked by the owning replica for the duration of a pop,
/// so sends to different mailboxes never contend.
struct Mailbox {
    tx: UnboundedSender<Message>,
    rx: Mutex<UnboundedReceiver<Message>>,
}

/// The shared transport binding a fixed set of replicas together.
pub struct Network {
    inboxes: Vec<Mailbox>,
}

impl Network {
    /// Build a bus with one mailbox per replica.
    pub fn new(num_replicas: usize) -> Result<Self, NetworkError> {
        if num_replicas < MIN_REPLICAS {
            return Err(NetworkError::ClusterTooSmall(num_replicas));
        }
        let inboxes = (0..num_replicas)
            .map(|_| {
                let (tx, rx) = mpsc::unbounded_channel();
                Mailbox {
                    tx,
                    rx: Mutex::new(rx),
                }
            })
            .collect();
        Ok(Network { inboxes })
    }

    /// Enqueue `msg` into the recipient's mailbox. Never blocks; wakes at
    /// most one receiver parked on that mailbox.
    pub fn send(&self, msg: Message) -> Result<(), NetworkError> {
        let inbox = self
            .inboxes
            .get(msg.to as usize)
            .ok_or(NetworkError::UnknownRecipient(msg.to))?;
        inbox
            .tx
            .send(msg)
            .map_err(|_| NetworkError::MailboxClosed(msg.to))
    }

    /// Pop the next message for `replica`, suspending until one is available.
    pub async fn recv(&self, replica: ReplicaId) -> Result<Message, NetworkError> {
        let inbox = self
            .inboxes
            .get(replica as usize)
            .ok_or(NetworkError::UnknownRecipient(replica))?;
        let mut rx = inbox.rx.lock().await;
        rx.recv().await.ok_or(NetworkError::MailboxClosed(replica))
    }

    /// Send `block` to every replica except `from`. A failed send aborts the
    /// remaining recipients.
    pub fn broadcast(&self, from: ReplicaId, block: Block) -> Result<(), NetworkError> {
        for to in 0..self.inboxes.len() as ReplicaId {
            if to == from {
                continue;
            }
            self.send(Message { from, to, block })?;
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.inboxes.len()
    }

    pub fn fault_tolerance(&self) -> usize {
        quorum::fault_tolerance(self.size())
    }

    pub fn quorum_size(&self) -> usize {
        quorum::quorum_size(self.size())
    }
}
