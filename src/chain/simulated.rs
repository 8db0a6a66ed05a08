//! Simulated Chain
//!
//! In-process chain implementing both [`EventSource`] and [`TransactionSubmitter`].
//! Each emitted message lands in its own block. Finality follows the head unless
//! auto-finalization is switched off. The destination side keeps execution counters so
//! tests can assert that nothing was executed twice.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{
    normalize_address, ChainError, ChainRejection, EventSource, FilterSpec, Log,
    RegisteredFilter, TransactionSubmitter,
};
use crate::message::{ExecutionCall, MessageId, ProtocolMessage};

#[derive(Debug)]
struct ChainState {
    filters: Vec<RegisteredFilter>,
    logs: Vec<Log>,
    head: u64,
    finalized: u64,
    auto_finalize: bool,
    unavailable: bool,
    executed: HashSet<MessageId>,
    execution_count: u64,
    re_execution_count: u64,
    /// Injected submission failures; `None` means a transport failure
    submission_failures: HashMap<MessageId, Option<ChainRejection>>,
}

/// In-memory chain for tests and local runs.
#[derive(Debug)]
pub struct SimulatedChain {
    state: RwLock<ChainState>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChainState {
                filters: Vec::new(),
                logs: Vec::new(),
                head: 0,
                finalized: 0,
                auto_finalize: true,
                unavailable: false,
                executed: HashSet::new(),
                execution_count: 0,
                re_execution_count: 0,
                submission_failures: HashMap::new(),
            }),
        }
    }

    /// Emits `message` as a message-sent event from `address` in a new block.
    ///
    /// Returns the block number the event landed in.
    pub async fn emit_message(
        &self,
        address: &str,
        event_sig: [u8; 32],
        message: &ProtocolMessage,
    ) -> u64 {
        self.emit_raw_log(
            address,
            vec![event_sig, *message.message_id.as_bytes()],
            message.encode(),
        )
        .await
    }

    /// Emits an arbitrary log in a new block. Returns the block number.
    pub async fn emit_raw_log(&self, address: &str, topics: Vec<[u8; 32]>, data: Vec<u8>) -> u64 {
        let mut state = self.state.write().await;
        state.head += 1;
        let block_number = state.head;
        state.logs.push(Log {
            block_number,
            log_index: 0,
            address: normalize_address(address),
            topics,
            data,
        });
        if state.auto_finalize {
            state.finalized = state.head;
        }
        block_number
    }

    /// Advances the head by `count` empty blocks.
    pub async fn mine_blocks(&self, count: u64) -> u64 {
        let mut state = self.state.write().await;
        state.head += count;
        if state.auto_finalize {
            state.finalized = state.head;
        }
        state.head
    }

    /// Stops finality from following the head.
    pub async fn set_auto_finalize(&self, enabled: bool) {
        self.state.write().await.auto_finalize = enabled;
    }

    /// Marks every block up to `block` (capped at the head) as finalized.
    pub async fn finalize_to(&self, block: u64) {
        let mut state = self.state.write().await;
        state.finalized = block.min(state.head);
    }

    pub async fn head(&self) -> u64 {
        self.state.read().await.head
    }

    /// Makes every RPC fail until switched back.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Makes submissions of `message_id` fail. `None` simulates a transport failure.
    pub async fn fail_submissions_of(&self, message_id: MessageId, rejection: Option<ChainRejection>) {
        self.state
            .write()
            .await
            .submission_failures
            .insert(message_id, rejection);
    }

    pub async fn clear_submission_failures(&self) {
        self.state.write().await.submission_failures.clear();
    }

    /// Records `message_id` as executed without going through `submit`.
    pub async fn mark_executed(&self, message_id: MessageId) {
        self.state.write().await.executed.insert(message_id);
    }

    /// Number of first-time executions.
    pub async fn execution_count(&self) -> u64 {
        self.state.read().await.execution_count
    }

    /// Number of submissions for messages that were already executed.
    pub async fn re_execution_count(&self) -> u64 {
        self.state.read().await.re_execution_count
    }

    fn check_available(state: &ChainState) -> Result<(), ChainError> {
        if state.unavailable {
            return Err(ChainError::Rpc(anyhow::anyhow!("simulated chain unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl EventSource for SimulatedChain {
    async fn register_filter(&self, spec: &FilterSpec) -> Result<RegisteredFilter, ChainError> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        if let Some(existing) = state.filters.iter().find(|f| spec.matches(f)) {
            return Ok(existing.clone());
        }

        let filter = RegisteredFilter {
            id: state.filters.len() as u64 + 1,
            name: spec.name.clone(),
            address: normalize_address(&spec.address),
            event_sig: spec.event_sig,
        };
        state.filters.push(filter.clone());
        Ok(filter)
    }

    async fn filters(&self) -> Result<Vec<RegisteredFilter>, ChainError> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(state.filters.clone())
    }

    async fn logs(
        &self,
        filter: &RegisteredFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let state = self.state.read().await;
        Self::check_available(&state)?;

        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.block_number >= from_block
                    && log.block_number <= to_block
                    && log.address.eq_ignore_ascii_case(&filter.address)
                    && log.topics.first() == Some(&filter.event_sig)
            })
            .cloned()
            .collect())
    }

    async fn latest_finalized_block(&self) -> Result<u64, ChainError> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(state.finalized)
    }
}

#[async_trait]
impl TransactionSubmitter for SimulatedChain {
    async fn is_executed(&self, message_id: &MessageId) -> Result<bool, ChainError> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(state.executed.contains(message_id))
    }

    async fn submit(&self, call: &ExecutionCall) -> Result<(), ChainError> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let message_id = call.message.message_id;
        if let Some(failure) = state.submission_failures.get(&message_id) {
            return Err(match failure {
                Some(rejection) => ChainError::Rejected(rejection.clone()),
                None => ChainError::Rpc(anyhow::anyhow!("simulated submission timeout")),
            });
        }

        if !state.executed.insert(message_id) {
            state.re_execution_count += 1;
            return Err(ChainError::Rejected(ChainRejection::AlreadyExecuted));
        }

        state.execution_count += 1;
        Ok(())
    }
}
