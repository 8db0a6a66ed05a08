//! Attestation Store Server
//!
//! Serves an in-memory attestation store over the store wire protocol
//! (`GET /get/{key}`, `POST /set/{key}`).
//!
//! ```bash
//! cargo run --bin attestation-store -- --host 127.0.0.1 --port 8090
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use modsec_relay::{storage::StoreServer, InMemoryAttestationStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "attestation-store")]
#[command(about = "In-memory attestation store served over HTTP")]
struct Args {
    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to
    #[arg(short, long, default_value_t = 8090)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("Failed to parse server address")?;

    let server = StoreServer::new(Arc::new(InMemoryAttestationStore::new()));
    server.run(addr).await
}
