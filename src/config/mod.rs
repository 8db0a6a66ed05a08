//! Configuration Management Module
//!
//! This module handles loading and validating configuration for the modsec relay.
//! Configuration covers the source and destination chain endpoints, verifier and
//! executor timing, and the attestation store. Signer keys never live in the file: the
//! config names the environment variable that holds them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chain::FilterSpec;
use crate::error::RelayError;
use crate::message::Lane;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chain the messages are emitted on
    pub source_chain: SourceChainConfig,
    /// Chain the messages are executed on
    pub dest_chain: DestChainConfig,
    /// Verifier settings (event signature, polling, signer key)
    pub verifier: VerifierConfig,
    /// Executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Attestation store settings
    pub storage: StorageConfig,
}

/// Chain family, which decides address formats and the attestation signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    Evm,
    Mvm,
    Svm,
}

impl FromStr for ChainFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evm" => Ok(Self::Evm),
            "mvm" => Ok(Self::Mvm),
            "svm" => Ok(Self::Svm),
            other => Err(format!("unknown chain family '{}', expected evm, mvm or svm", other)),
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Evm => "evm",
            Self::Mvm => "mvm",
            Self::Svm => "svm",
        };
        f.write_str(name)
    }
}

/// Source chain connection details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL for blockchain communication
    pub rpc_url: String,
    /// Protocol chain selector of this chain
    pub chain_selector: u64,
    /// Chain family: "evm", "mvm" or "svm"
    pub family: String,
    /// Address of the on-ramp contract emitting message-sent events
    pub on_ramp_addr: String,
    /// Timeout for a single RPC request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Destination chain connection details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL for blockchain communication
    pub rpc_url: String,
    /// Protocol chain selector of this chain
    pub chain_selector: u64,
    /// Chain family; must match the source family
    pub family: String,
    /// Address of the off-ramp contract executing messages
    pub off_ramp_addr: String,
    /// Node-managed account that sends execution transactions (required for EVM)
    #[serde(default)]
    pub executor_account: Option<String>,
    /// Timeout for a single RPC request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Verifier configuration.
///
/// The private key is loaded from the environment variable named here at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Message-sent event signature hash (32 bytes, hex)
    pub message_sent_event_sig: String,
    /// Polling interval for event monitoring in milliseconds
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Environment variable name containing the signer private key (base64 encoded)
    /// Default: "MODSEC_VERIFIER_PRIVATE_KEY"
    #[serde(default = "default_signer_private_key_env")]
    pub signer_private_key_env: String,
    /// Largest block range requested in a single log query
    #[serde(default = "default_log_query_block_range")]
    pub log_query_block_range: u64,
    /// Store lookups kept in flight during checkpoint recovery
    #[serde(default = "default_store_lookup_concurrency")]
    pub store_lookup_concurrency: usize,
    /// Lowest source block searched during checkpoint recovery (on-ramp deployment block)
    #[serde(default)]
    pub start_block: u64,
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Polling interval for the execution loop in milliseconds
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// First source block scanned when discovering message IDs
    #[serde(default)]
    pub start_block: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            start_block: 0,
        }
    }
}

/// Attestation store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Http,
    Memory,
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store type '{}', expected http or memory", other)),
        }
    }
}

/// Attestation store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store backend: "http" or "memory"
    #[serde(default = "default_store_type")]
    pub store_type: String,
    /// Base URL of the HTTP store
    #[serde(default)]
    pub endpoint: String,
    /// Timeout for a single store request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_polling_interval_ms() -> u64 {
    1000
}

fn default_signer_private_key_env() -> String {
    "MODSEC_VERIFIER_PRIVATE_KEY".to_string()
}

fn default_log_query_block_range() -> u64 {
    1000
}

fn default_store_lookup_concurrency() -> usize {
    16
}

fn default_store_type() -> String {
    "http".to_string()
}

impl VerifierConfig {
    /// Loads the signer private key from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The private key (base64 encoded)
    /// * `Err(anyhow::Error)` - Failed to load from environment
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.signer_private_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with the verifier signer private key (base64 encoded).",
                self.signer_private_key_env
            )
        })
    }

    /// Decoded message-sent event signature.
    pub fn event_sig(&self) -> Result<[u8; 32], RelayError> {
        let stripped = self
            .message_sent_event_sig
            .strip_prefix("0x")
            .unwrap_or(&self.message_sent_event_sig);
        let bytes = hex::decode(stripped).map_err(|e| {
            RelayError::configuration("verifier.message_sent_event_sig", format!("invalid hex: {}", e))
        })?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            RelayError::configuration(
                "verifier.message_sent_event_sig",
                format!("expected 32 bytes, got {}", b.len()),
            )
        })
    }
}

impl StorageConfig {
    pub fn store_type(&self) -> Result<StoreType, RelayError> {
        self.store_type
            .parse()
            .map_err(|e: String| RelayError::configuration("storage.store_type", e))
    }
}

// ============================================================================
// CONFIGURATION LOADING AND VALIDATION
// ============================================================================

impl Config {
    /// Family of the source chain.
    pub fn source_family(&self) -> Result<ChainFamily, RelayError> {
        self.source_chain
            .family
            .parse()
            .map_err(|e: String| RelayError::configuration("source_chain.family", e))
    }

    /// Lane served by this relay instance.
    pub fn lane(&self) -> Lane {
        Lane {
            source_chain_selector: self.source_chain.chain_selector,
            dest_chain_selector: self.dest_chain.chain_selector,
        }
    }

    /// Filter matching the on-ramp's message-sent events.
    pub fn message_sent_filter(&self) -> Result<FilterSpec, RelayError> {
        Ok(FilterSpec {
            name: format!("{}-message-sent", self.source_chain.name.to_lowercase().replace(' ', "-")),
            address: self.source_chain.on_ramp_addr.clone(),
            event_sig: self.verifier.event_sig()?,
        })
    }

    /// Validates every field the relay depends on.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(RelayError::Configuration)` - The first invalid field, by name
    pub fn validate(&self) -> Result<(), RelayError> {
        // Chain selectors
        if self.source_chain.chain_selector == 0 {
            return Err(RelayError::configuration(
                "source_chain.chain_selector",
                "must be non-zero",
            ));
        }
        if self.dest_chain.chain_selector == 0 {
            return Err(RelayError::configuration(
                "dest_chain.chain_selector",
                "must be non-zero",
            ));
        }

        // Chain families
        let source_family = self.source_family()?;
        let dest_family: ChainFamily = self
            .dest_chain
            .family
            .parse()
            .map_err(|e: String| RelayError::configuration("dest_chain.family", e))?;
        if dest_family != source_family {
            return Err(RelayError::configuration(
                "dest_chain.family",
                format!(
                    "destination family '{}' does not match source family '{}'",
                    dest_family, source_family
                ),
            ));
        }

        // Contract addresses
        validate_address("source_chain.on_ramp_addr", &self.source_chain.on_ramp_addr, source_family)?;
        validate_address("dest_chain.off_ramp_addr", &self.dest_chain.off_ramp_addr, dest_family)?;
        if dest_family == ChainFamily::Evm {
            let account = self.dest_chain.executor_account.as_deref().ok_or_else(|| {
                RelayError::configuration(
                    "dest_chain.executor_account",
                    "required for an evm destination",
                )
            })?;
            validate_address("dest_chain.executor_account", account, dest_family)?;
        }

        // Endpoints
        validate_http_url("source_chain.rpc_url", &self.source_chain.rpc_url)?;
        validate_http_url("dest_chain.rpc_url", &self.dest_chain.rpc_url)?;

        // Verifier
        self.verifier.event_sig()?;
        if self.verifier.polling_interval_ms == 0 {
            return Err(RelayError::configuration(
                "verifier.polling_interval_ms",
                "must be non-zero",
            ));
        }
        if self.verifier.log_query_block_range == 0 {
            return Err(RelayError::configuration(
                "verifier.log_query_block_range",
                "must be non-zero",
            ));
        }

        // Executor
        if self.executor.polling_interval_ms == 0 {
            return Err(RelayError::configuration(
                "executor.polling_interval_ms",
                "must be non-zero",
            ));
        }

        // Storage
        if self.storage.store_type()? == StoreType::Http {
            validate_http_url("storage.endpoint", &self.storage.endpoint)?;
        }

        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// The path comes from `MODSEC_RELAY_CONFIG_PATH`, defaulting to
    /// `config/modsec-relay.toml`.
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - Failed to load configuration, file doesn't exist, or validation failed
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("MODSEC_RELAY_CONFIG_PATH")
            .unwrap_or_else(|_| "config/modsec-relay.toml".to_string());
        Self::load_from_path(&config_path)
    }

    /// Loads and validates configuration from `path`.
    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        if !std::path::Path::new(path).exists() {
            return Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/modsec-relay.template.toml config/modsec-relay.toml\n\
                Then edit config/modsec-relay.toml with your actual values.",
                path
            ));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Checks that `addr` is well-formed for `family`.
fn validate_address(field: &str, addr: &str, family: ChainFamily) -> Result<(), RelayError> {
    let hex_body = addr.strip_prefix("0x");
    let is_hex = |s: &str| s.chars().all(|c| c.is_ascii_hexdigit());

    let valid = match family {
        ChainFamily::Evm => hex_body.is_some_and(|h| h.len() == 40 && is_hex(h)),
        ChainFamily::Mvm => hex_body.is_some_and(|h| (1..=64).contains(&h.len()) && is_hex(h)),
        ChainFamily::Svm => match hex_body {
            Some(h) => h.len() == 64 && is_hex(h),
            None => bs58::decode(addr)
                .into_vec()
                .map(|bytes| bytes.len() == 32)
                .unwrap_or(false),
        },
    };

    if valid {
        Ok(())
    } else {
        Err(RelayError::configuration(
            field,
            format!("'{}' is not a valid {} address", addr, family),
        ))
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), RelayError> {
    let url = url::Url::parse(value)
        .map_err(|e| RelayError::configuration(field, format!("'{}' is not a URL: {}", value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(RelayError::configuration(
            field,
            format!("unsupported scheme '{}', expected http or https", scheme),
        )),
    }
}
