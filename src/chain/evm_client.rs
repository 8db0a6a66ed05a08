//! EVM Client Module
//!
//! JSON-RPC adapters for EVM-compatible chains:
//!
//! - [`EvmClient`]: source-side [`EventSource`] backed by `eth_getLogs` and the node's
//!   `finalized` block tag
//! - [`EvmSubmitter`]: destination-side [`TransactionSubmitter`] calling the off-ramp
//!   contract's `isExecuted(bytes32)` and `execute(bytes,bytes)` functions
//!
//! `eth_getLogs` is stateless, so filters are kept in an in-process registry keyed by
//! (address, event signature).

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    normalize_address, ChainError, ChainRejection, EventSource, FilterSpec, Log,
    RegisteredFilter, TransactionSubmitter,
};
use crate::message::{keccak256, ExecutionCall, MessageId};

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// EVM event log entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    /// Block number (JSON-RPC uses camelCase: blockNumber)
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    /// Transaction hash (JSON-RPC uses camelCase: transactionHash)
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: String,
    /// Log index (JSON-RPC uses camelCase: logIndex)
    #[serde(rename = "logIndex")]
    pub log_index: String,
}

impl TryFrom<EvmLog> for Log {
    type Error = anyhow::Error;

    fn try_from(log: EvmLog) -> Result<Self, Self::Error> {
        let topics = log
            .topics
            .iter()
            .map(|t| parse_word(t))
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("Invalid topics in log of tx {}", log.transaction_hash))?;

        Ok(Log {
            block_number: parse_hex_u64(&log.block_number).context("Invalid blockNumber")?,
            log_index: parse_hex_u64(&log.log_index).context("Invalid logIndex")?,
            address: normalize_address(&log.address),
            topics,
            data: hex::decode(strip_0x(&log.data)).context("Invalid log data")?,
        })
    }
}

/// Subset of a block header returned by `eth_getBlockByNumber`
#[derive(Debug, Deserialize)]
struct EvmBlockHeader {
    number: String,
}

// ============================================================================
// EVM CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with EVM-compatible blockchain nodes via JSON-RPC
#[derive(Debug)]
pub struct EvmClient {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the EVM node (e.g., "http://127.0.0.1:8545")
    base_url: String,
    /// Filters registered with this client
    filters: RwLock<Vec<RegisteredFilter>>,
    next_request_id: AtomicU64,
}

impl EvmClient {
    /// Creates a new EVM client for the given node URL
    ///
    /// # Arguments
    ///
    /// * `node_url` - Base URL of the EVM node (e.g., "http://127.0.0.1:8545")
    /// * `timeout` - Per-request timeout
    ///
    /// # Returns
    ///
    /// * `Ok(EvmClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create client
    pub fn new(node_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: node_url.to_string(),
            filters: RwLock::new(Vec::new()),
            next_request_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends one JSON-RPC request and returns its `result` (which may be `null`).
    ///
    /// JSON-RPC errors the node reports for a processed call are classified into
    /// [`ChainRejection`]s; everything else is an [`ChainError::Rpc`].
    async fn json_rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
        };

        let response: JsonRpcResponse<T> = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, self.base_url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", method, self.base_url))?;

        if let Some(error) = response.error {
            return Err(classify_rpc_error(&self.base_url, method, error));
        }

        Ok(response.result)
    }
}

/// Maps a JSON-RPC error object to a chain rejection or a transport-level failure.
fn classify_rpc_error(base_url: &str, method: &str, error: JsonRpcError) -> ChainError {
    let lowered = error.message.to_lowercase();
    if lowered.contains("already executed") {
        ChainError::Rejected(ChainRejection::AlreadyExecuted)
    } else if lowered.contains("insufficient funds") {
        ChainError::Rejected(ChainRejection::InsufficientFunds(error.message))
    } else if error.code == 3 || lowered.contains("revert") {
        ChainError::Rejected(ChainRejection::Reverted(error.message))
    } else {
        ChainError::Rpc(anyhow::anyhow!(
            "JSON-RPC error from {} ({}): {} (code: {})",
            base_url,
            method,
            error.message,
            error.code
        ))
    }
}

#[async_trait]
impl EventSource for EvmClient {
    async fn register_filter(&self, spec: &FilterSpec) -> Result<RegisteredFilter, ChainError> {
        let mut filters = self.filters.write().await;
        if let Some(existing) = filters.iter().find(|f| spec.matches(f)) {
            return Ok(existing.clone());
        }

        let filter = RegisteredFilter {
            id: filters.len() as u64 + 1,
            name: spec.name.clone(),
            address: normalize_address(&spec.address),
            event_sig: spec.event_sig,
        };
        filters.push(filter.clone());
        Ok(filter)
    }

    async fn filters(&self) -> Result<Vec<RegisteredFilter>, ChainError> {
        Ok(self.filters.read().await.clone())
    }

    async fn logs(
        &self,
        filter: &RegisteredFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let params = serde_json::json!({
            "address": filter.address,
            "topics": [format!("0x{}", hex::encode(filter.event_sig))],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });

        let raw: Vec<EvmLog> = self
            .json_rpc("eth_getLogs", vec![params])
            .await?
            .unwrap_or_default();

        let mut logs = raw
            .into_iter()
            .map(Log::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        debug!(
            "eth_getLogs [{}, {}] for filter '{}' returned {} log(s)",
            from_block,
            to_block,
            filter.name,
            logs.len()
        );
        Ok(logs)
    }

    async fn latest_finalized_block(&self) -> Result<u64, ChainError> {
        let header: EvmBlockHeader = self
            .json_rpc(
                "eth_getBlockByNumber",
                vec![serde_json::json!("finalized"), serde_json::json!(false)],
            )
            .await?
            .ok_or_else(|| anyhow::anyhow!("Node at {} has no finalized block", self.base_url))?;

        Ok(parse_hex_u64(&header.number).context("Invalid finalized block number")?)
    }
}

// ============================================================================
// EVM SUBMITTER IMPLEMENTATION
// ============================================================================

/// Submits execution calls to an off-ramp contract from a node-managed account.
#[derive(Debug, Clone)]
pub struct EvmSubmitter {
    client: Arc<EvmClient>,
    off_ramp_addr: String,
    from_addr: String,
    receipt_poll_interval: Duration,
    receipt_poll_attempts: u32,
}

impl EvmSubmitter {
    /// Creates a submitter targeting `off_ramp_addr` and sending from `from_addr`.
    pub fn new(client: Arc<EvmClient>, off_ramp_addr: &str, from_addr: &str) -> Self {
        Self {
            client,
            off_ramp_addr: normalize_address(off_ramp_addr),
            from_addr: normalize_address(from_addr),
            receipt_poll_interval: Duration::from_millis(500),
            receipt_poll_attempts: 30,
        }
    }

    /// Overrides how often and how many times the transaction receipt is polled.
    pub fn with_receipt_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.receipt_poll_interval = interval;
        self.receipt_poll_attempts = attempts.max(1);
        self
    }

    /// Waits for a receipt and maps a failed status to [`ChainRejection::Reverted`].
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<(), ChainError> {
        for _ in 0..self.receipt_poll_attempts {
            let receipt: Option<serde_json::Value> = self
                .client
                .json_rpc("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
                .await?;

            if let Some(receipt) = receipt {
                let status = receipt
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or("0x0");
                if status == "0x1" {
                    return Ok(());
                }
                return Err(ChainError::Rejected(ChainRejection::Reverted(format!(
                    "transaction {} failed with status {}",
                    tx_hash, status
                ))));
            }

            tokio::time::sleep(self.receipt_poll_interval).await;
        }

        Err(ChainError::Rpc(anyhow::anyhow!(
            "Timed out waiting for EVM transaction receipt: {}",
            tx_hash
        )))
    }
}

#[async_trait]
impl TransactionSubmitter for EvmSubmitter {
    async fn is_executed(&self, message_id: &MessageId) -> Result<bool, ChainError> {
        let mut calldata = Vec::with_capacity(36);
        calldata.extend_from_slice(&function_selector("isExecuted(bytes32)"));
        calldata.extend_from_slice(message_id.as_bytes());

        let result: String = self
            .client
            .json_rpc(
                "eth_call",
                vec![
                    serde_json::json!({
                        "to": self.off_ramp_addr,
                        "data": format!("0x{}", hex::encode(&calldata)),
                    }),
                    serde_json::json!("latest"),
                ],
            )
            .await?
            .unwrap_or_default();

        // ABI-encoded bool: any non-zero word means true
        Ok(strip_0x(&result).chars().any(|c| c != '0'))
    }

    async fn submit(&self, call: &ExecutionCall) -> Result<(), ChainError> {
        let mut calldata = function_selector("execute(bytes,bytes)").to_vec();
        calldata.extend(abi_encode_bytes_pair(&call.encoded_message, &call.signature));

        let tx_hash: String = self
            .client
            .json_rpc(
                "eth_sendTransaction",
                vec![serde_json::json!({
                    "from": self.from_addr,
                    "to": self.off_ramp_addr,
                    "data": format!("0x{}", hex::encode(&calldata)),
                })],
            )
            .await?
            .ok_or_else(|| anyhow::anyhow!("eth_sendTransaction returned no transaction hash"))?;

        info!(
            "Submitted execute for message {} in tx {}",
            call.message.message_id, tx_hash
        );
        self.wait_for_receipt(&tx_hash).await
    }
}

// ============================================================================
// ABI AND HEX HELPERS
// ============================================================================

/// Returns keccak256 of an event signature string, i.e. its topic 0.
pub fn event_signature(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// Returns the 4-byte selector of a function signature string.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// ABI-encodes two dynamic `bytes` arguments (heads then tails).
pub fn abi_encode_bytes_pair(first: &[u8], second: &[u8]) -> Vec<u8> {
    let first_tail = encode_bytes_tail(first);
    let second_tail = encode_bytes_tail(second);

    let mut out = Vec::with_capacity(64 + first_tail.len() + second_tail.len());
    out.extend_from_slice(&abi_word(64));
    out.extend_from_slice(&abi_word(64 + first_tail.len() as u64));
    out.extend(first_tail);
    out.extend(second_tail);
    out
}

fn encode_bytes_tail(bytes: &[u8]) -> Vec<u8> {
    let padded_len = bytes.len().div_ceil(32) * 32;
    let mut out = Vec::with_capacity(32 + padded_len);
    out.extend_from_slice(&abi_word(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out.resize(32 + padded_len, 0);
    out
}

fn abi_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

fn parse_hex_u64(s: &str) -> anyhow::Result<u64> {
    u64::from_str_radix(strip_0x(s), 16).with_context(|| format!("Invalid hex quantity '{}'", s))
}

fn parse_word(s: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(strip_0x(s)).with_context(|| format!("Invalid hex word '{}'", s))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("Expected 32-byte word, got {} bytes", b.len()))
}
