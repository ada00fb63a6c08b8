pub mod driver;
pub mod message;
pub mod pending;
pub mod replica;
pub mod store;
pub mod votes;

pub use driver::*;
pub use message::*;
pub use pending::*;
pub use replica::*;
pub use store::*;
pub use votes::*;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::network::Network;

    use super::*;

    fn cluster(n: usize) -> (Arc<Network>, Vec<Replica>) {
        let network = Arc::new(Network::new(n).expect("valid cluster size"));
        let replicas = (0..n as ReplicaId)
            .map(|id| Replica::new(id, Arc::clone(&network)))
            .collect();
        (network, replicas)
    }

    /// Let the spawned receive loops exchange everything in flight.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn four_replicas_commit_the_leaders_value() {
        let (_network, mut replicas) = cluster(4);

        // Bootstrap: the leader of view 0 proposes once for instance 0.
        let leader = &mut replicas[0];
        let proposal = leader.pre_prepare_block(Value(67));
        leader.propose_block(proposal).unwrap();

        let mut drivers: Vec<ReplicaDriver> =
            replicas.into_iter().map(ReplicaDriver::start).collect();
        settle().await;

        for driver in &mut drivers {
            let replica = driver.stop().await.unwrap().expect("first stop");
            let committed = replica
                .commit_log()
                .get(0)
                .copied()
                .unwrap_or_else(|| panic!("replica {} committed nothing", replica.id()));
            assert_eq!(committed.value, Value(67));
            assert_eq!(committed.instance_id, 0);
            assert_eq!(replica.commit_log().len(), 1);
        }
    }

    #[tokio::test]
    async fn seven_replicas_commit_the_leaders_value() {
        let (_network, mut replicas) = cluster(7);

        let leader = &mut replicas[0];
        let proposal = leader.pre_prepare_block(Value(41));
        leader.propose_block(proposal).unwrap();

        let mut drivers: Vec<ReplicaDriver> =
            replicas.into_iter().map(ReplicaDriver::start).collect();
        settle().await;

        for driver in &mut drivers {
            let replica = driver.stop().await.unwrap().expect("first stop");
            assert_eq!(
                replica.commit_log().get(0).map(|block| block.value),
                Some(Value(41))
            );
        }
    }

    #[tokio::test]
    async fn reordered_delivery_still_commits() {
        let (network, mut replicas) = cluster(4);
        let node = replicas.remove(2);

        // Feed replica 2's mailbox as if its peers had already run, with the
        // pre-prepare arriving after votes that depend on it.
        let pre_prepare = Block::new(Phase::PrePrepare, 0, 0, Value(67));
        let prepare = Block::new(Phase::Prepare, 0, 0, Value(67));
        let commit = Block::new(Phase::Commit, 0, 0, Value(67));
        let scrambled = [
            Message { from: 1, to: 2, block: prepare },
            Message { from: 3, to: 2, block: prepare },
            Message { from: 3, to: 2, block: commit },
            Message { from: 0, to: 2, block: pre_prepare },
            Message { from: 1, to: 2, block: commit },
        ];
        for msg in scrambled {
            network.send(msg).unwrap();
        }

        let mut driver = ReplicaDriver::start(node);
        settle().await;

        let node = driver.stop().await.unwrap().expect("first stop");
        let committed = node.commit_log().get(0).copied().expect("quorum crossed");
        assert_eq!(committed.value, Value(67));
        // Everything parked along the way was replayed or dropped.
        assert_eq!(node.backlog_len(), 0);
    }

    #[tokio::test]
    async fn duplicate_deliveries_do_not_double_count() {
        let (network, mut replicas) = cluster(4);
        let node = replicas.remove(2);

        let pre_prepare = Block::new(Phase::PrePrepare, 0, 0, Value(67));
        let commit = Block::new(Phase::Commit, 0, 0, Value(67));
        // Two commit votes, each delivered twice: not enough for a quorum of
        // three no matter how often they repeat.
        for msg in [
            Message { from: 0, to: 2, block: pre_prepare },
            Message { from: 0, to: 2, block: commit },
            Message { from: 0, to: 2, block: commit },
            Message { from: 1, to: 2, block: commit },
            Message { from: 1, to: 2, block: commit },
        ] {
            network.send(msg).unwrap();
        }

        let mut driver = ReplicaDriver::start(node);
        settle().await;

        let node = driver.stop().await.unwrap().expect("first stop");
        assert!(node.commit_log().is_empty());
    }
}
