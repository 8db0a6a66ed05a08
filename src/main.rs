//! Modsec Relay Service
//!
//! Runs the verifier, the executor, or both against EVM chains.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin modsec-relay -- --config config/modsec-relay.toml --role all
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! MODSEC_RELAY_CONFIG_PATH=config/modsec-relay.toml cargo run --bin modsec-relay
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use modsec_relay::{
    storage::store_from_config, AttestationSigner, ChainFamily, Config, EvmClient, EvmSubmitter,
    Executor, ExecutorSettings, RelayError, RelayServices, Verifier, VerifierSettings,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Verifier and executor in one process
    All,
    Verifier,
    Executor,
}

#[derive(Parser, Debug)]
#[command(name = "modsec-relay")]
#[command(about = "Attests modsec cross-chain messages and executes them on the destination chain")]
struct Args {
    /// Path to configuration file (default: config/modsec-relay.toml or MODSEC_RELAY_CONFIG_PATH)
    #[arg(short, long)]
    config: Option<String>,

    /// Which services to run
    #[arg(short, long, value_enum, default_value_t = Role::All)]
    role: Role,
}

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Modsec Relay ({:?})", args.role);

    // Priority: CLI arg > env var > default
    let config = match args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            Config::load_from_path(&path)?
        }
        None => Config::load()?,
    };
    info!(
        "Configuration loaded: {} (selector {}) -> {} (selector {})",
        config.source_chain.name,
        config.source_chain.chain_selector,
        config.dest_chain.name,
        config.dest_chain.chain_selector
    );

    let family = config.source_family()?;
    if family != ChainFamily::Evm {
        return Err(RelayError::configuration(
            "source_chain.family",
            format!("no network adapter for the {} family", family),
        )
        .into());
    }

    let store = store_from_config(&config.storage)?;
    let source = Arc::new(
        EvmClient::new(
            &config.source_chain.rpc_url,
            Duration::from_millis(config.source_chain.request_timeout_ms),
        )
        .context("Failed to create source chain client")?,
    );

    let mut verifier = None;
    let mut executor = None;

    if matches!(args.role, Role::All | Role::Verifier) {
        let signer = Arc::new(AttestationSigner::from_config(&config)?);
        verifier = Some(Arc::new(Verifier::new(
            source.clone(),
            store.clone(),
            signer,
            VerifierSettings::from_config(&config)?,
        )));
    }

    if matches!(args.role, Role::All | Role::Executor) {
        let dest = Arc::new(
            EvmClient::new(
                &config.dest_chain.rpc_url,
                Duration::from_millis(config.dest_chain.request_timeout_ms),
            )
            .context("Failed to create destination chain client")?,
        );
        let executor_account = config.dest_chain.executor_account.as_deref().ok_or_else(|| {
            RelayError::configuration("dest_chain.executor_account", "required for an evm destination")
        })?;
        let submitter = Arc::new(EvmSubmitter::new(
            dest,
            &config.dest_chain.off_ramp_addr,
            executor_account,
        ));
        executor = Some(Arc::new(Executor::new(
            source.clone(),
            submitter,
            store.clone(),
            ExecutorSettings::from_config(&config)?,
        )));
    }

    // Everything is built before anything starts; a failed start stops what already runs
    let services = RelayServices::new(verifier, executor);
    services.start().await?;

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, stopping services...");
    services.stop().await;

    info!("Modsec Relay stopped");
    Ok(())
}
