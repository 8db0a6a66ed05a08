//! Checkpoint Recovery
//!
//! Recomputes the block the verifier resumes scanning from. Nothing is persisted: the
//! finalized log history since `start_block` and the attestation store are the only
//! inputs.
//!
//! | History                         | Checkpoint                                   |
//! |---------------------------------|----------------------------------------------|
//! | no messages on the lane         | current finalized block                      |
//! | every message attested          | current finalized block                      |
//! | some attested                   | block of the lowest-sequence unattested one  |
//! | none attested                   | block of the first emitted message           |
//!
//! Messages are checked in sequence order and the scan stops at the first gap, so the
//! result never lies past an unattested message even when the attested set has holes.

use futures::{stream, StreamExt};
use tracing::{debug, info, warn};

use crate::chain::{logs_in_windows, EventSource, RegisteredFilter};
use crate::error::RelayError;
use crate::message::{Lane, MessageId};
use crate::storage::AttestationStore;

/// A message observed in the source chain's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoricalMessage {
    pub sequence_number: u64,
    pub block_number: u64,
    pub message_id: MessageId,
}

/// Parameters of one recovery run.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryParams {
    pub lane: Lane,
    /// Largest block range per log query
    pub block_range: u64,
    /// Store lookups kept in flight
    pub lookup_concurrency: usize,
    /// No block below this one is queried
    pub start_block: u64,
}

/// Computes the initial checkpoint.
///
/// # Returns
///
/// * `Ok(u64)` - Block to resume scanning from
/// * `Err(RelayError::TransientIo)` - The source chain or the store could not be read
pub async fn recover_checkpoint(
    source: &dyn EventSource,
    store: &dyn AttestationStore,
    filter: &RegisteredFilter,
    params: RecoveryParams,
) -> Result<u64, RelayError> {
    let finalized = source
        .latest_finalized_block()
        .await
        .map_err(|e| RelayError::transient("checkpoint recovery: finalized block", e))?;

    let history = message_history(
        source,
        filter,
        params.lane,
        params.start_block,
        finalized,
        params.block_range,
    )
    .await?;
    if history.is_empty() {
        let checkpoint = finalized.max(params.start_block);
        info!(
            "No message history in [{}, {}], checkpoint = {}",
            params.start_block, finalized, checkpoint
        );
        return Ok(checkpoint);
    }

    match first_unattested(store, &history, params.lookup_concurrency).await? {
        Some(gap) => {
            info!(
                "Recovered checkpoint at block {} (first unattested message {} seq {}, {} message(s) in history)",
                gap.block_number,
                gap.message_id,
                gap.sequence_number,
                history.len()
            );
            Ok(gap.block_number)
        }
        None => {
            info!(
                "All {} historical message(s) attested, checkpoint = {}",
                history.len(),
                finalized
            );
            Ok(finalized)
        }
    }
}

/// Lists lane messages in `[from_block, finalized]`, ordered by sequence number.
///
/// Undecodable logs are skipped with a warning.
pub async fn message_history(
    source: &dyn EventSource,
    filter: &RegisteredFilter,
    lane: Lane,
    from_block: u64,
    finalized: u64,
    block_range: u64,
) -> Result<Vec<HistoricalMessage>, RelayError> {
    let logs = logs_in_windows(source, filter, from_block, finalized, block_range)
        .await
        .map_err(|e| RelayError::transient("checkpoint recovery: log history", e))?;

    let mut history: Vec<HistoricalMessage> = logs
        .iter()
        .filter_map(|log| match log.decode_message() {
            Ok(message) => Some((log.block_number, message)),
            Err(e) => {
                warn!(
                    "Skipping undecodable log at block {} index {}: {}",
                    log.block_number, log.log_index, e
                );
                None
            }
        })
        .filter(|(_, message)| lane.carries(message))
        .map(|(block_number, message)| HistoricalMessage {
            sequence_number: message.sequence_number,
            block_number,
            message_id: message.message_id,
        })
        .collect();

    history.sort_by_key(|m| (m.sequence_number, m.block_number));
    Ok(history)
}

/// Returns the lowest-sequence message without an attestation, if any.
///
/// Lookups are pipelined `concurrency` deep but consumed in order; outstanding lookups are
/// dropped once the first gap is found.
pub async fn first_unattested(
    store: &dyn AttestationStore,
    history: &[HistoricalMessage],
    concurrency: usize,
) -> Result<Option<HistoricalMessage>, RelayError> {
    let mut lookups = stream::iter(history.iter().copied())
        .map(|message| async move {
            let key = message.message_id.store_key();
            store
                .contains(&key)
                .await
                .map(|attested| (message, attested))
                .map_err(|e| RelayError::from_store(format!("checkpoint recovery: lookup {}", key), e))
        })
        .buffered(concurrency.max(1));

    while let Some(lookup) = lookups.next().await {
        let (message, attested) = lookup?;
        if !attested {
            return Ok(Some(message));
        }
        debug!("Message {} (seq {}) already attested", message.message_id, message.sequence_number);
    }

    Ok(None)
}
