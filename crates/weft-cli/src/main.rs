//! WEFT CLI
//!
//! Peer-to-peer file sharing with a permissioned replicated ledger.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use weft_crypto::SigningKey;
use weft_node::{Node, NodeConfig, NodeEvent};
use weft_proto::NodeId;
use weft_rendezvous::RendezvousServer;

use config::Config;

/// WEFT - share files and a ledger with your peers
#[derive(Parser)]
#[command(name = "weft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node daemon
    Start {
        /// Rendezvous service address
        #[arg(long)]
        rendezvous: Option<SocketAddr>,

        /// Peer listener bind address
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Identity seed file (hex, 32 bytes); generated with `weft keygen`
        #[arg(long)]
        identity: Option<PathBuf>,

        /// Whitelist this node itself (single-node ledgers)
        #[arg(long)]
        whitelist_self: bool,

        /// Extra whitelist member ids
        #[arg(long = "whitelist")]
        whitelist: Vec<String>,
    },

    /// Run a rendezvous relay server
    Rendezvous {
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },

    /// Generate an identity seed and print its node id
    Keygen {
        /// Where to store the seed
        #[arg(short, long, default_value = "weft.identity")]
        output: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Start {
            rendezvous,
            listen,
            identity,
            whitelist_self,
            whitelist,
        } => {
            let file = Config::load(&cli.config)?;
            let mut node_config = file.apply(NodeConfig::default())?;
            if let Some(addr) = rendezvous {
                node_config.rendezvous_addr = addr;
            }
            if let Some(addr) = listen {
                node_config.listen_addr = addr;
            }
            node_config.whitelist_self |= whitelist_self;
            for entry in &whitelist {
                let id = NodeId::parse(entry)
                    .map_err(|e| anyhow::anyhow!("bad whitelist id {entry:?}: {e}"))?;
                node_config.whitelist.push(id);
            }
            let identity_path = identity.or_else(|| file.identity.clone().map(PathBuf::from));
            if let Some(path) = identity_path {
                node_config.identity_seed = Some(config::load_seed(&path)?);
            }
            run_node(node_config).await
        }
        Commands::Rendezvous { bind } => {
            let server = RendezvousServer::bind(bind)
                .await
                .context("binding rendezvous service")?;
            println!("rendezvous service on {}", server.local_addr());
            server.run().await;
            Ok(())
        }
        Commands::Keygen { output } => {
            let key = SigningKey::generate(&mut rand_core::OsRng);
            config::store_seed(&output, &key.to_bytes())?;
            let node_id = NodeId::from_verifying_key(&key.verifying_key());
            println!("identity written to {}", output.display());
            println!("node id: {node_id}");
            Ok(())
        }
    }
}

async fn run_node(node_config: NodeConfig) -> anyhow::Result<()> {
    let node = Node::start(node_config).await.context("starting node")?;
    println!("node {} listening on {}", node.node_id(), node.listen_addr());

    let mut events = node.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => report(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("shutting down");
                node.shutdown().await.ok();
                break;
            }
        }
    }
    Ok(())
}

fn report(event: &NodeEvent) {
    match event {
        NodeEvent::PeerConnected { peer } => println!("peer connected: {peer}"),
        NodeEvent::PeerDisconnected { peer } => println!("peer disconnected: {peer}"),
        NodeEvent::BlockAdded { block } => {
            println!(
                "block {} committed ({} transactions)",
                block.index,
                block.transactions.len()
            );
        }
        NodeEvent::LeaderChanged { leader } => match leader {
            Some(leader) => println!("leader: {leader}"),
            None => println!("no leader"),
        },
        NodeEvent::FileAvailable { offer } => {
            println!("file available: {} ({} bytes) from {}", offer.name, offer.size, offer.advertiser);
        }
        NodeEvent::DownloadCompleted { name, content, .. } => {
            println!("downloaded {} ({} bytes)", name, content.len());
        }
        NodeEvent::DownloadFailed { file_id, reason } => {
            println!("download {file_id} failed: {reason}");
        }
        _ => {}
    }
}
