//! gossip-sim - in-process simulator for Thunder address gossip
//!
//! Spins up a set of gossip nodes wired by in-memory links, waits for every node to
//! learn every other node's address, then floods one external announcement and reports
//! how many fan-out waves it took.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thunder_gossip::{
    AddressAnnouncement, ConnectionRole, GossipConfig, GossipMessage, GossipNode, Link,
    LogFormat, init_tracing,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gossip-sim")]
#[command(about = "Simulate address gossip between in-process nodes")]
#[command(version)]
struct Cli {
    /// Default log directive; RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run {
        /// Number of nodes
        #[arg(short, long, default_value_t = 5)]
        nodes: usize,

        /// How nodes are wired
        #[arg(long, value_enum, default_value_t = Topology::Mesh)]
        topology: Topology,

        /// Config file applied to every node (port is overridden)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Node i advertises base_port + i
        #[arg(long, default_value_t = 10_000)]
        base_port: u16,

        /// Seconds to wait for each phase to converge
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "gossip.json")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Topology {
    /// Every pair of nodes is connected
    Mesh,
    /// Each node connects to the next one
    Ring,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(&cli.log_level, format)?;

    match cli.command {
        Commands::Run {
            nodes,
            topology,
            config,
            base_port,
            timeout_secs,
        } => {
            let base = match config {
                Some(path) => GossipConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => GossipConfig::default(),
            };
            run(nodes, topology, base, base_port, Duration::from_secs(timeout_secs)).await?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

/// Returns `(initiator, acceptor)` pairs, one per connected pair of nodes. With three
/// or more nodes every node initiates at least one link, so every node announces itself.
fn edges(n: usize, topology: Topology) -> Vec<(usize, usize)> {
    if n == 2 {
        return vec![(0, 1)];
    }
    let mut edges: Vec<_> = (0..n).map(|i| (i, (i + 1) % n)).collect();
    if topology == Topology::Mesh {
        for i in 0..n {
            for j in (i + 2)..n {
                if !(i == 0 && j == n - 1) {
                    edges.push((i, j));
                }
            }
        }
    }
    edges
}

async fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

fn total_broadcasts(nodes: &[GossipNode]) -> u64 {
    nodes.iter().map(|n| n.stats().broadcasts).sum()
}

async fn run(
    count: usize,
    topology: Topology,
    base: GossipConfig,
    base_port: u16,
    timeout: Duration,
) -> anyhow::Result<()> {
    anyhow::ensure!(count >= 2, "need at least two nodes, got {count}");

    let nodes = (0..count)
        .map(|i| {
            let port = u16::try_from(i)
                .ok()
                .and_then(|i| base_port.checked_add(i))
                .context("port range overflows u16")?;
            let config = GossipConfig {
                port,
                ..base.clone()
            };
            Ok(GossipNode::in_memory(config, SigningKey::generate(&mut OsRng))?)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let links = edges(count, topology);
    for &(initiator, acceptor) in &links {
        // Connection tasks run until the process exits.
        let _ = GossipNode::connect(&nodes[initiator], &nodes[acceptor]);
    }
    info!(nodes = count, links = links.len(), ?topology, "network wired");

    // Phase 1: self-announcements. Nodes only announce on links they open.
    let mut initiators: Vec<_> = links.iter().map(|&(initiator, _)| initiator).collect();
    initiators.sort_unstable();
    initiators.dedup();
    let ids: Vec<_> = initiators.iter().map(|&i| nodes[i].node_id()).collect();
    let started = Instant::now();
    let converged = wait_for(timeout, || {
        nodes.iter().all(|node| {
            ids.iter()
                .all(|id| node.engine().store().contains(id).unwrap_or(false))
        })
    })
    .await;
    if converged {
        info!(elapsed = ?started.elapsed(), "every node knows every announced address");
    } else {
        warn!(elapsed = ?started.elapsed(), "self-announcements did not converge");
    }

    // Phase 2: one external announcement injected at node 0.
    let (node_side, client) = Link::pair(base.outbound_capacity);
    let _ = nodes[0].spawn_connection(node_side, ConnectionRole::Acceptor);
    let before = total_broadcasts(&nodes);

    let external = AddressAnnouncement::signed(&SigningKey::generate(&mut OsRng), "10.0.0.1", 9000);
    client
        .handle()
        .send(GossipMessage::Announce(external.clone()).encode()?)?;

    let flooded = wait_for(timeout, || {
        nodes.iter().all(|node| {
            node.engine()
                .store()
                .contains(&external.node_id())
                .unwrap_or(false)
        })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let waves = total_broadcasts(&nodes) - before;
    info!(node = %external.node_id(), waves, flooded, "external announcement flooded");

    println!("{:<46} {:>6} {:>8} {:>10} {:>9} {:>10}", "NODE", "PEERS", "KNOWN", "RECEIVED", "DUPLICATE", "DELIVERED");
    for node in &nodes {
        let stats = node.stats();
        println!(
            "{:<46} {:>6} {:>8} {:>10} {:>9} {:>10}",
            node.node_id().to_string(),
            node.peer_count(),
            node.known_announcements()?.len(),
            stats.announcements_received,
            stats.announcements_duplicate,
            stats.deliveries,
        );
    }
    println!();
    println!("Fan-out waves for one announcement: {waves} (nodes: {count})");

    anyhow::ensure!(converged && flooded, "gossip did not converge within {timeout:?}");
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&GossipConfig::default())?;
    std::fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;
    println!("Config written to: {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_has_one_link_per_node() {
        assert_eq!(edges(4, Topology::Ring), vec![(0, 1), (1, 2), (2, 3), (3, 0)]);
    }

    #[test]
    fn mesh_connects_every_pair_once() {
        let mut pairs: Vec<_> = edges(5, Topology::Mesh)
            .into_iter()
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        assert_eq!(pairs.len(), 10);
        assert_eq!(edges(5, Topology::Mesh).len(), 10);
    }

    #[test]
    fn two_nodes_share_a_single_link() {
        for topology in [Topology::Ring, Topology::Mesh] {
            assert_eq!(edges(2, topology), vec![(0, 1)]);
        }
    }

    #[test]
    fn every_node_initiates() {
        for topology in [Topology::Ring, Topology::Mesh] {
            let links = edges(6, topology);
            assert!((0..6).all(|i| links.iter().any(|&(a, _)| a == i)));
        }
    }
}
