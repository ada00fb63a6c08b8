//! In-process PBFT cluster simulation.
//!
//! Spins up a fixed set of replicas over an in-memory message bus, has the
//! leader propose a single value, lets the cluster settle, and reports every
//! replica's commit log.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pbft_sim::consensus::{Replica, ReplicaDriver, Value};
use pbft_sim::network::Network;

#[derive(Parser, Debug)]
#[command(name = "pbft-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of replicas in the cluster (minimum 4)
    #[arg(short = 'r', long, default_value = "4")]
    replicas: usize,

    /// Value the leader proposes
    #[arg(short = 'v', long, default_value = "67")]
    value: u32,

    /// How long to let the cluster settle before teardown, in milliseconds
    #[arg(long, default_value = "500")]
    settle_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!(replicas = args.replicas, value = args.value, "creating cluster");

    let network = Arc::new(Network::new(args.replicas)?);

    let mut replicas: Vec<Replica> = (0..args.replicas as u32)
        .map(|id| Replica::new(id, Arc::clone(&network)))
        .collect();

    // Replica 0 leads view 0: inject the single proposal for instance 0.
    // Mailboxes buffer, so proposing before the loops start delivers the
    // same way as proposing after.
    let leader = &mut replicas[0];
    let proposal = leader.pre_prepare_block(Value(args.value));
    leader.propose_block(proposal)?;

    let mut drivers: Vec<ReplicaDriver> =
        replicas.into_iter().map(ReplicaDriver::start).collect();

    tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;

    for driver in &mut drivers {
        if let Some(replica) = driver.stop().await? {
            match replica.commit_log().get(0) {
                Some(block) => info!(replica = replica.id(), committed = %block, "final state"),
                None => info!(replica = replica.id(), "final state: nothing committed"),
            }
        }
    }

    Ok(())
}
