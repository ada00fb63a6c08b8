//! Task-per-replica execution wrapper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::network::{Network, NetworkError};

use super::message::{Message, ReplicaId};
use super::replica::Replica;

/// Failure while tearing a replica down.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("replica task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Owns the task running one replica's receive loop.
///
/// Every driver must be stopped before the process exits; a dropped driver
/// leaves its loop parked on the mailbox forever.
pub struct ReplicaDriver {
    id: ReplicaId,
    network: Arc<Network>,
    running: AtomicBool,
    handle: Option<JoinHandle<Replica>>,
}

impl ReplicaDriver {
    /// Spawn the receive loop for `replica`.
    pub fn start(mut replica: Replica) -> Self {
        let id = replica.id();
        let network = replica.network();
        let handle = tokio::spawn(async move {
            replica.run().await;
            replica
        });
        ReplicaDriver {
            id,
            network,
            running: AtomicBool::new(true),
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Idempotent teardown. The first call sends the shutdown sentinel,
    /// joins the loop, and hands back the replica's final state; later calls
    /// return `Ok(None)`.
    pub async fn stop(&mut self) -> Result<Option<Replica>, ShutdownError> {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }
        debug!(replica = self.id, "stopping");
        self.network.send(Message::shutdown(self.id))?;
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(None),
        };
        let replica = handle.await?;
        Ok(Some(replica))
    }
}
