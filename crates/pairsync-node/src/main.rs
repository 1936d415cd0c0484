//! # pairsync
//!
//! Command-line node for inspecting and repairing the local sync state:
//! the local identity, known topics, access grants and channel logs.
//!
//! The peer-to-peer transport is not part of this binary. The node runs on
//! an in-memory endpoint, so posts are persisted and granted locally and
//! picked up by peers once a transport reports a connection.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pairsync_core::{share, IdentityRegistry, SyncCoordinator};
use pairsync_net::{ConnectionRegistry, MemoryNetwork};
use pairsync_shared::constants::PROTOCOL_VERSION;
use pairsync_shared::IdentityId;
use pairsync_store::Database;

use crate::config::NodeConfig;

#[derive(Parser, Debug)]
#[command(name = "pairsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file (overrides PAIRSYNC_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the local main identity
    Whoami,
    /// List known topics and their channel instances
    Topics,
    /// Report participants missing a grant on local channels (JSON)
    Audit,
    /// Re-grant every local channel to its participants
    Repair,
    /// Post a message to the topic shared with a peer
    Post {
        /// Peer identity (hex)
        peer: String,
        text: String,
    },
    /// Print the merged messages of the topic shared with a peer
    Messages {
        /// Peer identity (hex)
        peer: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pairsync_core=debug,pairsync_net=debug")),
        )
        .init();

    let args = Args::parse();
    info!(protocol = PROTOCOL_VERSION, "Starting pairsync node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = NodeConfig::from_env();
    if let Some(db) = args.db {
        config.db_path = Some(db);
    }
    info!(?config, "Loaded configuration");

    let database = match &config.db_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("opening database")?;
    let db = share(database);

    let identity = IdentityRegistry::new(db.clone()).load_or_create().await?;
    let (transport, _inbox) = MemoryNetwork::new().endpoint(identity.id());
    let sync = SyncCoordinator::open(
        db,
        &identity,
        ConnectionRegistry::new(),
        Arc::new(transport),
        config.sync_config(),
    )
    .await?;
    let me = identity.id();

    match args.command {
        Command::Whoami => {
            println!("{me}");
        }
        Command::Topics => {
            for topic in sync.directory().list_topics().await? {
                let channels = sync.directory().list_channel_instances(&topic).await?;
                let owners: Vec<String> = channels.iter().map(|c| c.owner.short()).collect();
                println!("{topic}");
                println!("    channels: {}", owners.join(", "));
            }
        }
        Command::Audit => {
            let missing = sync.grants().audit(&me).await?;
            println!("{}", serde_json::to_string_pretty(&missing)?);
        }
        Command::Repair => {
            let sweep = sync.grants().repair(&me).await?;
            println!(
                "created {}, existing {}, failed {}",
                sweep.created.len(),
                sweep.existing.len(),
                sweep.failed.len()
            );
        }
        Command::Post { peer, text } => {
            let peer = parse_peer(&peer)?;
            let topic = sync.open_topic(&[peer]).await?;
            let receipt = sync.post_message(&topic, &text).await?;
            println!("#{} {}", receipt.message.seq, receipt.message.hash);
        }
        Command::Messages { peer } => {
            let peer = parse_peer(&peer)?;
            let topic = sync.open_topic(&[peer]).await?;
            for message in sync.list_messages(&topic).await? {
                println!(
                    "{} {}: {}",
                    message.timestamp.to_rfc3339(),
                    message.author.short(),
                    message.content
                );
            }
        }
    }

    Ok(())
}

fn parse_peer(hex: &str) -> anyhow::Result<IdentityId> {
    IdentityId::from_hex(hex).with_context(|| format!("invalid peer identity {hex:?}"))
}
