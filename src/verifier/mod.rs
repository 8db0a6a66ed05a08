//! Verifier Service
//!
//! Watches the source chain for message-sent events and writes one signed attestation per
//! observed message into the attestation store.
//!
//! On `start` the verifier registers its event filter (idempotently) and recovers the
//! checkpoint from the store, then polls on a fixed interval. Each tick scans
//! `[checkpoint, finalized]`; afterwards the checkpoint moves to the block of the earliest
//! failed store write, or past the finalized head when every write succeeded.

pub mod checkpoint;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{ensure_filter, logs_in_windows, EventSource, FilterSpec, Log, RegisteredFilter};
use crate::config::Config;
use crate::crypto::AttestationSigner;
use crate::error::RelayError;
use crate::message::{AttestationPayload, DecodeError, Lane, MessageId, ProtocolMessage};
use crate::service::{Lifecycle, PollingWorker, ServiceState};
use crate::storage::AttestationStore;

use checkpoint::{recover_checkpoint, RecoveryParams};

/// Verifier settings derived from the relay configuration.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub lane: Lane,
    pub filter: FilterSpec,
    pub polling_interval: Duration,
    pub log_query_block_range: u64,
    pub store_lookup_concurrency: usize,
    /// Lower bound of the history searched by checkpoint recovery
    pub start_block: u64,
}

impl VerifierSettings {
    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        Ok(Self {
            lane: config.lane(),
            filter: config.message_sent_filter()?,
            polling_interval: Duration::from_millis(config.verifier.polling_interval_ms),
            log_query_block_range: config.verifier.log_query_block_range,
            store_lookup_concurrency: config.verifier.store_lookup_concurrency,
            start_block: config.verifier.start_block,
        })
    }
}

/// Source-chain watcher producing attestations.
pub struct Verifier {
    source: Arc<dyn EventSource>,
    store: Arc<dyn AttestationStore>,
    signer: Arc<AttestationSigner>,
    settings: VerifierSettings,
    filter: RwLock<Option<RegisteredFilter>>,
    /// Next block to scan; `None` until recovered
    checkpoint: Mutex<Option<u64>>,
    lifecycle: Lifecycle,
}

impl Verifier {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn AttestationStore>,
        signer: Arc<AttestationSigner>,
        settings: VerifierSettings,
    ) -> Self {
        Self {
            source,
            store,
            signer,
            settings,
            filter: RwLock::new(None),
            checkpoint: Mutex::new(None),
            lifecycle: Lifecycle::new("verifier"),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Registers the filter, recovers the checkpoint and spawns the poll loop.
    ///
    /// Returns as soon as the loop is spawned. Setup failures propagate and leave the
    /// verifier startable again.
    pub async fn start(self: &Arc<Self>, parent: &CancellationToken) -> Result<(), RelayError> {
        self.lifecycle.begin_start().await?;

        let setup = async {
            self.register_filter().await?;
            self.initialize_last_processed_block().await
        };
        let checkpoint = match setup.await {
            Ok(block) => block,
            Err(e) => {
                self.lifecycle.abort_start().await;
                return Err(e);
            }
        };

        info!("Verifier starting from block {}", checkpoint);
        self.lifecycle
            .spawn(parent, self.clone(), self.settings.polling_interval)
            .await
    }

    /// Cancels the poll loop and waits for it to exit.
    pub async fn stop(&self) -> Result<(), RelayError> {
        self.lifecycle.stop().await
    }

    pub async fn state(&self) -> ServiceState {
        self.lifecycle.state().await
    }

    // ========================================================================
    // SETUP
    // ========================================================================

    /// Returns the message-sent filter, registering it only if the source lacks one.
    ///
    /// # Returns
    ///
    /// * `Ok(RegisteredFilter)` - The existing or newly registered filter
    /// * `Err(RelayError::Configuration)` - Registration failed
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

    /// Recomputes the checkpoint from chain history and the store, and adopts it.
    pub async fn initialize_last_processed_block(&self) -> Result<u64, RelayError> {
        let filter = self.registered_filter().await?;
        let block = recover_checkpoint(
            self.source.as_ref(),
            self.store.as_ref(),
            &filter,
            RecoveryParams {
                lane: self.settings.lane,
                block_range: self.settings.log_query_block_range,
                lookup_concurrency: self.settings.store_lookup_concurrency,
                start_block: self.settings.start_block,
            },
        )
        .await?;

        *self.checkpoint.lock().await = Some(block);
        Ok(block)
    }

    /// Next block the verifier will scan.
    pub async fn checkpoint(&self) -> Option<u64> {
        *self.checkpoint.lock().await
    }

    async fn registered_filter(&self) -> Result<RegisteredFilter, RelayError> {
        self.filter.read().await.clone().ok_or_else(|| {
            RelayError::Lifecycle("verifier filter is not registered".to_string())
        })
    }

    // ========================================================================
    // POLLING
    // ========================================================================

    /// Scans `[checkpoint, finalized]` and attests every lane message found.
    ///
    /// Per-message failures are returned together as [`RelayError::Batch`].
    pub async fn poll_once(&self) -> Result<(), RelayError> {
        let filter = self.registered_filter().await?;
        let mut checkpoint = self.checkpoint.lock().await;
        let from_block = checkpoint.ok_or_else(|| {
            RelayError::Lifecycle("verifier checkpoint is not initialized".to_string())
        })?;

        let finalized = self
            .source
            .latest_finalized_block()
            .await
            .map_err(|e| RelayError::transient("verifier: finalized block", e))?;
        if finalized < from_block {
            debug!("No new finalized blocks (checkpoint {}, finalized {})", from_block, finalized);
            return Ok(());
        }

        let logs = logs_in_windows(
            self.source.as_ref(),
            &filter,
            from_block,
            finalized,
            self.settings.log_query_block_range,
        )
        .await
        .map_err(|e| RelayError::transient("verifier: fetch logs", e))?;

        let mut errors = Vec::new();
        let mut earliest_failed_write: Option<u64> = None;
        let mut attested = 0usize;

        for log in &logs {
            let message = match self.verify_log(log) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping log at block {}: {}", log.block_number, e);
                    errors.push(e);
                    continue;
                }
            };

            match self.attest(&message).await {
                Ok(()) => {
                    attested += 1;
                    info!(
                        "Attested message {} (seq {}, block {})",
                        message.message_id, message.sequence_number, log.block_number
                    );
                }
                Err(e) => {
                    earliest_failed_write =
                        Some(earliest_failed_write.map_or(log.block_number, |b| b.min(log.block_number)));
                    errors.push(e);
                }
            }
        }

        let next = earliest_failed_write.unwrap_or(finalized.saturating_add(1));
        *checkpoint = Some(next);
        debug!(
            "Verifier tick [{}, {}]: {} log(s), {} attested, next checkpoint {}",
            from_block,
            finalized,
            logs.len(),
            attested,
            next
        );

        RelayError::batch(errors)
    }

    /// Decodes a log and checks it is a well-formed message for this lane.
    ///
    /// `Ok(None)` means the message belongs to another lane.
    fn verify_log(&self, log: &Log) -> Result<Option<ProtocolMessage>, RelayError> {
        let message = log.decode_message().map_err(|source| RelayError::ProtocolDecode {
            message_id: topic_message_id(log),
            source,
        })?;

        if !self.settings.lane.carries(&message) {
            debug!(
                "Ignoring message {} for lane {} -> {}",
                message.message_id, message.source_chain_selector, message.dest_chain_selector
            );
            return Ok(None);
        }

        let computed = message.compute_message_id();
        if computed != message.message_id {
            return Err(RelayError::ProtocolDecode {
                message_id: message.message_id,
                source: DecodeError::MessageIdMismatch {
                    expected: computed,
                    actual: message.message_id,
                },
            });
        }

        Ok(Some(message))
    }

    /// Signs the message hash and writes the payload under the message ID.
    async fn attest(&self, message: &ProtocolMessage) -> Result<(), RelayError> {
        let key = message.message_id.store_key();
        let signature = self
            .signer
            .sign(&message.hash())
            .map_err(|e| RelayError::transient(format!("verifier: sign {}", key), e))?;

        let payload = AttestationPayload::new(message, signature);
        self.store
            .set(&key, payload.to_bytes())
            .await
            .map_err(|e| RelayError::from_store(format!("verifier: store {}", key), e))
    }
}

/// Message ID carried in topic 1, when present.
fn topic_message_id(log: &Log) -> MessageId {
    log.topics.get(1).copied().map(MessageId).unwrap_or_default()
}

#[async_trait]
impl PollingWorker for Verifier {
    fn name(&self) -> &'static str {
        "verifier"
    }

    async fn poll_once(&self) -> Result<(), RelayError> {
        Verifier::poll_once(self).await
    }
}
