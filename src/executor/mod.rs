//! Executor Service
//!
//! Submits attested messages on the destination chain, exactly once in effect.
//!
//! The store protocol has no key listing, so the executor discovers candidate message IDs
//! from the source chain's finalized log history and keeps them in a pending queue ordered
//! by sequence number. Each tick, for every pending message:
//!
//! 1. `get` the attestation (`NotFound` = not attested yet, retried later)
//! 2. decode it into an execution call
//! 3. ask the destination whether the message is already executed
//! 4. submit
//!
//! The destination chain is the source of truth for execution state. There is no local
//! ledger of submitted messages; an "already executed" rejection is expected and absorbed.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{
    ensure_filter, logs_in_windows, ChainError, ChainRejection, EventSource, FilterSpec,
    RegisteredFilter, TransactionSubmitter,
};
use crate::config::Config;
use crate::error::RelayError;
use crate::message::{AttestationPayload, Lane, MessageId};
use crate::service::{Lifecycle, PollingWorker, ServiceState};
use crate::storage::{AttestationStore, StoreError};

/// Executor settings derived from the relay configuration.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub lane: Lane,
    pub filter: FilterSpec,
    pub polling_interval: Duration,
    /// First source block scanned for message IDs
    pub start_block: u64,
    pub log_query_block_range: u64,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        Ok(Self {
            lane: config.lane(),
            filter: config.message_sent_filter()?,
            polling_interval: Duration::from_millis(config.executor.polling_interval_ms),
            start_block: config.executor.start_block,
            log_query_block_range: config.verifier.log_query_block_range,
        })
    }
}

/// What happened to one pending message during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Submitted and confirmed by this executor
    Executed,
    /// The destination already records the message as executed
    AlreadyExecuted,
    /// No attestation stored yet
    NotAttested,
}

#[derive(Debug)]
struct Discovery {
    /// Next source block to scan for message IDs
    next_block: u64,
    /// Messages awaiting execution, ordered by (sequence number, id)
    pending: BTreeSet<(u64, MessageId)>,
}

/// Destination-side worker executing attested messages.
pub struct Executor {
    source: Arc<dyn EventSource>,
    submitter: Arc<dyn TransactionSubmitter>,
    store: Arc<dyn AttestationStore>,
    settings: ExecutorSettings,
    filter: RwLock<Option<RegisteredFilter>>,
    discovery: Mutex<Discovery>,
    lifecycle: Lifecycle,
}

impl Executor {
    pub fn new(
        source: Arc<dyn EventSource>,
        submitter: Arc<dyn TransactionSubmitter>,
        store: Arc<dyn AttestationStore>,
        settings: ExecutorSettings,
    ) -> Self {
        let next_block = settings.start_block;
        Self {
            source,
            submitter,
            store,
            settings,
            filter: RwLock::new(None),
            discovery: Mutex::new(Discovery {
                next_block,
                pending: BTreeSet::new(),
            }),
            lifecycle: Lifecycle::new("executor"),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Registers the source filter and spawns the execution loop.
    pub async fn start(self: &Arc<Self>, parent: &CancellationToken) -> Result<(), RelayError> {
        self.lifecycle.begin_start().await?;

        if let Err(e) = self.register_filter().await {
            self.lifecycle.abort_start().await;
            return Err(e);
        }

        info!("Executor starting discovery from block {}", self.settings.start_block);
        self.lifecycle
            .spawn(parent, self.clone(), self.settings.polling_interval)
            .await
    }

    /// Cancels the execution loop and waits for it to exit.
    pub async fn stop(&self) -> Result<(), RelayError> {
        self.lifecycle.stop().await
    }

    pub async fn state(&self) -> ServiceState {
        self.lifecycle.state().await
    }

    /// Returns the message-sent filter, registering it only if the source lacks one.
    pub async fn register_filter(&self) -> Result<RegisteredFilter, RelayError> {
        let filter = ensure_filter(self.source.as_ref(), &self.settings.filter)
            .await
            .map_err(|e| {
                RelayError::configuration(
                    "source_chain.on_ramp_addr",
                    format!("filter registration failed: {}", e),
                )
            })?;

        *self.filter.write().await = Some(filter.clone());
        Ok(filter)
    }

    /// Number of discovered messages not yet settled.
    pub async fn pending_count(&self) -> usize {
        self.discovery.lock().await.pending.len()
    }

    // ========================================================================
    // MAIN LOOP
    // ========================================================================

    /// Discovers new message IDs, then tries to execute every pending message.
    ///
    /// One message's failure never blocks the others; failures are returned together as
    /// [`RelayError::Batch`].
    pub async fn poll_once(&self) -> Result<(), RelayError> {
        let mut discovery = self.discovery.lock().await;
        let mut errors = Vec::new();

        if let Err(e) = self.discover(&mut discovery).await {
            warn!("Executor discovery failed: {}", e);
            errors.push(e);
        }

        let candidates: Vec<(u64, MessageId)> = discovery.pending.iter().copied().collect();
        let mut executed = 0usize;

        for entry in candidates {
            let (sequence_number, message_id) = entry;
            match self.execute_message(&message_id).await {
                Ok(ExecutionOutcome::NotAttested) => {
                    debug!("Message {} (seq {}) not attested yet", message_id, sequence_number);
                }
                Ok(ExecutionOutcome::Executed) => {
                    executed += 1;
                    discovery.pending.remove(&entry);
                }
                Ok(ExecutionOutcome::AlreadyExecuted) => {
                    discovery.pending.remove(&entry);
                }
                Err(e @ RelayError::ProtocolDecode { .. }) => {
                    warn!("Dropping message {}: {}", message_id, e);
                    discovery.pending.remove(&entry);
                    errors.push(e);
                }
                Err(e) => errors.push(e),
            }
        }

        if executed > 0 {
            info!(
                "Executor tick: {} executed, {} pending",
                executed,
                discovery.pending.len()
            );
        }

        RelayError::batch(errors)
    }

    /// Runs the get → decode → is_executed → submit sequence for one message.
    pub async fn execute_message(&self, message_id: &MessageId) -> Result<ExecutionOutcome, RelayError> {
        let key = message_id.store_key();
        let bytes = match self.store.get(&key).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => return Ok(ExecutionOutcome::NotAttested),
            Err(e) => return Err(RelayError::from_store(format!("executor: get {}", key), e)),
        };

        let call = AttestationPayload::from_bytes(&bytes)
            .and_then(|payload| payload.decode_call(message_id))
            .map_err(|source| RelayError::ProtocolDecode {
                message_id: *message_id,
                source,
            })?;

        let already_executed = self
            .submitter
            .is_executed(message_id)
            .await
            .map_err(|e| RelayError::from_chain(*message_id, format!("executor: is_executed {}", key), e))?;
        if already_executed {
            debug!("Message {} already executed on destination", message_id);
            return Ok(ExecutionOutcome::AlreadyExecuted);
        }

        match self.submitter.submit(&call).await {
            Ok(()) => {
                info!(
                    "Executed message {} (seq {})",
                    message_id, call.message.sequence_number
                );
                Ok(ExecutionOutcome::Executed)
            }
            Err(ChainError::Rejected(ChainRejection::AlreadyExecuted)) => {
                warn!("Message {} was executed concurrently; skipping", message_id);
                Ok(ExecutionOutcome::AlreadyExecuted)
            }
            Err(e) => Err(RelayError::from_chain(
                *message_id,
                format!("executor: submit {}", key),
                e,
            )),
        }
    }

    /// Scans newly finalized source blocks and queues lane messages.
    async fn discover(&self, discovery: &mut Discovery) -> Result<(), RelayError> {
        let filter = self.filter.read().await.clone().ok_or_else(|| {
            RelayError::Lifecycle("executor filter is not registered".to_string())
        })?;

        let finalized = self
            .source
            .latest_finalized_block()
            .await
            .map_err(|e| RelayError::transient("executor: finalized block", e))?;
        if finalized < discovery.next_block {
            return Ok(());
        }

        let logs = logs_in_windows(
            self.source.as_ref(),
            &filter,
            discovery.next_block,
            finalized,
            self.settings.log_query_block_range,
        )
        .await
        .map_err(|e| RelayError::transient("executor: fetch logs", e))?;

        let mut discovered = 0usize;
        for log in &logs {
            match log.decode_message() {
                Ok(message) if self.settings.lane.carries(&message) => {
                    if discovery
                        .pending
                        .insert((message.sequence_number, message.message_id))
                    {
                        discovered += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "Skipping undecodable log at block {} index {}: {}",
                    log.block_number, log.log_index, e
                ),
            }
        }

        if discovered > 0 {
            debug!(
                "Discovered {} message(s) in blocks [{}, {}]",
                discovered, discovery.next_block, finalized
            );
        }
        discovery.next_block = finalized.saturating_add(1);
        Ok(())
    }
}

#[async_trait]
impl PollingWorker for Executor {
    fn name(&self) -> &'static str {
        "executor"
    }

    async fn poll_once(&self) -> Result<(), RelayError> {
        Executor::poll_once(self).await
    }
}
