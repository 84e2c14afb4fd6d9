//! i2chat - anonymous streams over an I2P router's SAM bridge
//!
//! Connects to the bridge, loads or creates the local identity, then runs
//! one operation: create a session, show the `.b32.i2p` address, accept an
//! inbound stream, or connect to a remote destination.

mod address;
mod config;
mod menu;
mod ops;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use i2chat_sam::{create_or_load_identity, IdentityStore, SamConnection};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "i2chat")]
#[command(about = "Anonymous I2P streams over the SAM v3 bridge")]
struct Args {
    /// Configuration file (default: ./i2chat.yaml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a default configuration file and exit
    #[arg(long)]
    init: bool,

    /// SAM bridge address, overrides the config file
    #[arg(long, env = "I2CHAT_SAM_ADDR")]
    sam_addr: Option<String>,

    /// Identity file, overrides the config file
    #[arg(long, env = "I2CHAT_IDENTITY")]
    identity: Option<PathBuf>,

    /// Pipe stdin/stdout over the stream after accept/connect
    #[arg(long)]
    relay: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    operation: Option<Operation>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create a STREAM session bound to the local identity
    CreateSession { session_id: String },
    /// Show the local identity's .b32.i2p address
    Address,
    /// Wait for an inbound stream on a session
    Accept { session_id: String },
    /// Open a stream from a session to a remote destination
    Connect {
        session_id: String,
        destination: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init {
        Config::create_default(args.config.as_deref())?;
        println!(
            "Wrote default configuration to {}",
            args.config
                .as_deref()
                .unwrap_or_else(|| Path::new(config::DEFAULT_CONFIG_FILE))
                .display()
        );
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(addr) = args.sam_addr.clone() {
        config.sam.bridge_addr = addr;
    }
    if let Some(path) = args.identity.clone() {
        config.storage.identity_path = path;
    }

    init_logging(&config.logging.level, args.debug);

    run(args, config).await
}

fn init_logging(level: &str, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args, config: Config) -> Result<()> {
    let mut connection = SamConnection::connect(&config.sam)
        .await
        .context("Failed to connect to SAM bridge")?;
    println!("Connected to SAM bridge at: {}", config.sam.bridge_addr);

    let store = IdentityStore::new(&config.storage.identity_path);
    let identity = create_or_load_identity(&mut connection, &store, config.sam.signature_type)
        .await
        .context("Failed to set up identity")?;
    println!("Public Destination: {}", identity.short_destination());

    let operation = match args.operation {
        Some(operation) => operation,
        None => {
            let mut input = tokio::io::BufReader::new(tokio::io::stdin());
            let mut output = tokio::io::stdout();
            menu::choose(&mut input, &mut output).await?
        }
    };
    info!("Running {:?}", operation);

    match operation {
        Operation::CreateSession { session_id } => {
            ops::create_session(connection, &config.sam, &session_id, identity).await
        }
        Operation::Address => {
            connection.close().await;
            ops::show_address(&identity)
        }
        Operation::Accept { session_id } => {
            connection.close().await;
            ops::accept(&config.sam, &session_id, args.relay).await
        }
        Operation::Connect {
            session_id,
            destination,
        } => {
            connection.close().await;
            ops::connect(&config.sam, &session_id, &destination, args.relay).await
        }
    }
}
