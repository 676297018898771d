#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! SigMail server: store-and-forward messaging over plain TCP

use clap::Parser;
use sigmail::{MailServer, MailStore, ServerConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sigmail-server")]
#[command(about = "Store-and-forward mail server")]
struct Args {
    /// Bind address (overrides SIGMAIL_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides SIGMAIL_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Path of the JSON database file (overrides SIGMAIL_DB)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let store = MailStore::open(&config.db_path);
    let server = MailServer::bind(&config.host, config.port, store).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            let (users, emails) = server.summary();
            info!(users, emails, "Shutting down");
        }
    }

    Ok(())
}
