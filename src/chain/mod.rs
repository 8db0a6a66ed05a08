//! Chain Collaborators
//!
//! Capability traits for the two chain-facing collaborators of the relay core:
//!
//! - [`EventSource`]: ordered, filterable, finality-aware log stream on the source chain
//! - [`TransactionSubmitter`]: execution-state queries and call submission on the destination
//!
//! Network-backed implementations live in [`evm_client`]; [`simulated`] provides an
//! in-process chain for tests and local runs.

pub mod evm_client;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::message::{ExecutionCall, MessageId, ProtocolMessage};

pub use evm_client::{EvmClient, EvmSubmitter};
pub use simulated::SimulatedChain;

// ============================================================================
// ERRORS
// ============================================================================

/// Reason a destination chain refused a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainRejection {
    /// The message was already executed on the destination chain
    AlreadyExecuted,
    /// The call reverted for another reason
    Reverted(String),
    /// The executor account cannot pay for the transaction
    InsufficientFunds(String),
}

impl fmt::Display for ChainRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExecuted => write!(f, "already executed"),
            Self::Reverted(reason) => write!(f, "reverted: {}", reason),
            Self::InsufficientFunds(reason) => write!(f, "insufficient funds: {}", reason),
        }
    }
}

/// Failure talking to a chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Transport, timeout or malformed RPC response
    #[error("chain rpc failed: {0:#}")]
    Rpc(anyhow::Error),
    /// The chain processed the request and refused it
    #[error("chain rejected call: {0}")]
    Rejected(ChainRejection),
}

impl From<anyhow::Error> for ChainError {
    fn from(err: anyhow::Error) -> Self {
        Self::Rpc(err)
    }
}

// ============================================================================
// FILTERS AND LOGS
// ============================================================================

/// What a filter should match: one event signature emitted by one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    /// Human-readable filter name
    pub name: String,
    /// Emitting contract address (0x-prefixed hex)
    pub address: String,
    /// Event signature hash (topic 0)
    pub event_sig: [u8; 32],
}

impl FilterSpec {
    /// Whether `filter` covers exactly this (address, event signature) pair.
    pub fn matches(&self, filter: &RegisteredFilter) -> bool {
        filter.address.eq_ignore_ascii_case(&self.address) && filter.event_sig == self.event_sig
    }
}

/// A filter registered with an [`EventSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredFilter {
    /// Adapter-assigned identifier
    pub id: u64,
    /// Human-readable filter name
    pub name: String,
    /// Emitting contract address (0x-prefixed hex)
    pub address: String,
    /// Event signature hash (topic 0)
    pub event_sig: [u8; 32],
}

/// A finalized event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    /// Block the log was emitted in
    pub block_number: u64,
    /// Position of the log within its block
    pub log_index: u64,
    /// Emitting contract address
    pub address: String,
    /// Topics; topic 0 is the event signature
    pub topics: Vec<[u8; 32]>,
    /// Non-indexed event data
    pub data: Vec<u8>,
}

impl Log {
    /// Decodes the message carried by a message-sent event.
    pub fn decode_message(&self) -> Result<ProtocolMessage, crate::message::DecodeError> {
        ProtocolMessage::decode(&self.data)
    }
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Ordered, filterable, finality-aware log stream.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Registers a filter. Registering an existing (address, signature) pair must not
    /// create a second filter.
    async fn register_filter(&self, spec: &FilterSpec) -> Result<RegisteredFilter, ChainError>;

    /// Lists every registered filter.
    async fn filters(&self) -> Result<Vec<RegisteredFilter>, ChainError>;

    /// Logs matching `filter` in `[from_block, to_block]`, ordered by block then log index.
    async fn logs(
        &self,
        filter: &RegisteredFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError>;

    /// Latest block the chain guarantees will not be reorganized.
    async fn latest_finalized_block(&self) -> Result<u64, ChainError>;
}

/// Destination chain call submission.
///
/// Nonce and gas handling belong to the implementation. Chain-level refusals must be
/// surfaced as [`ChainError::Rejected`], never swallowed.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Whether the destination chain already records `message_id` as executed.
    async fn is_executed(&self, message_id: &MessageId) -> Result<bool, ChainError>;

    /// Submits the execution call for one attested message.
    async fn submit(&self, call: &ExecutionCall) -> Result<(), ChainError>;
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Returns the filter covering `spec`, registering one only when none exists.
///
/// Calling this again after a successful registration is a pure no-op returning the same
/// filter.
pub async fn ensure_filter(
    source: &dyn EventSource,
    spec: &FilterSpec,
) -> Result<RegisteredFilter, ChainError> {
    let existing = source.filters().await?;
    if let Some(filter) = existing.into_iter().find(|f| spec.matches(f)) {
        return Ok(filter);
    }

    let filter = source.register_filter(spec).await?;
    info!(
        "Registered filter '{}' (id={}) for address={}, event_sig=0x{}",
        filter.name,
        filter.id,
        filter.address,
        hex::encode(filter.event_sig)
    );
    Ok(filter)
}

/// Fetches logs for `[from_block, to_block]` in windows of at most `max_range` blocks.
pub async fn logs_in_windows(
    source: &dyn EventSource,
    filter: &RegisteredFilter,
    from_block: u64,
    to_block: u64,
    max_range: u64,
) -> Result<Vec<Log>, ChainError> {
    let max_range = max_range.max(1);
    let mut logs = Vec::new();
    let mut start = from_block;

    while start <= to_block {
        let end = start.saturating_add(max_range - 1).min(to_block);
        logs.extend(source.logs(filter, start, end).await?);
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }

    Ok(logs)
}

/// Normalizes a hex address to lowercase with a 0x prefix.
pub fn normalize_address(addr: &str) -> String {
    let stripped = addr.strip_prefix("0x").unwrap_or(addr);
    format!("0x{}", stripped.to_lowercase())
}
