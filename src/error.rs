//! Error Taxonomy
//!
//! Every failure the relay core reports falls into one of the categories below. Startup
//! failures (configuration, filter registration, checkpoint recovery) propagate out of
//! `start()`. Per-message failures inside a poll tick are collected into
//! [`RelayError::Batch`] and reported once at the end of the tick.

use std::fmt;

use crate::chain::{ChainError, ChainRejection};
use crate::message::{DecodeError, MessageId};
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed or missing required configuration. Fatal, never retried.
    #[error("configuration error in `{field}`: {reason}")]
    Configuration { field: String, reason: String },

    /// Adapter, store or chain-call failure. Retried on the next tick.
    #[error("{context}: {source}")]
    TransientIo {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// An attestation that does not decode into a valid on-chain call.
    #[error("undecodable attestation for message {message_id}: {source}")]
    ProtocolDecode {
        message_id: MessageId,
        #[source]
        source: DecodeError,
    },

    /// The destination chain refused a submission.
    #[error("destination chain rejected message {message_id}: {reason}")]
    ChainRejection {
        message_id: MessageId,
        reason: ChainRejection,
    },

    /// Per-message failures accumulated over one poll tick.
    #[error("{}", BatchDisplay(.0))]
    Batch(Vec<RelayError>),

    /// `start`/`stop` called out of order.
    #[error("service lifecycle error: {0}")]
    Lifecycle(String),
}

impl RelayError {
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn transient(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::TransientIo {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Wraps a store failure observed while handling `context`.
    pub fn from_store(context: impl Into<String>, err: StoreError) -> Self {
        Self::transient(context, err)
    }

    /// Maps a chain failure for `message_id` into the taxonomy.
    pub fn from_chain(message_id: MessageId, context: impl Into<String>, err: ChainError) -> Self {
        match err {
            ChainError::Rejected(reason) => Self::ChainRejection { message_id, reason },
            other => Self::transient(context, other),
        }
    }

    /// Collapses a list of per-message errors: `Ok` when empty, otherwise a batch.
    pub fn batch(errors: Vec<RelayError>) -> Result<(), RelayError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::Batch(errors))
        }
    }

    /// Field named by a configuration error.
    pub fn config_field(&self) -> Option<&str> {
        match self {
            Self::Configuration { field, .. } => Some(field),
            _ => None,
        }
    }
}

struct BatchDisplay<'a>(&'a [RelayError]);

impl fmt::Display for BatchDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} message(s) failed:", self.0.len())?;
        for err in self.0 {
            write!(f, "\n  - {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_empty_is_ok() {
        assert!(RelayError::batch(vec![]).is_ok());
    }

    #[test]
    fn test_batch_display_lists_every_error() {
        let err = RelayError::batch(vec![
            RelayError::transient("store get failed", anyhow::anyhow!("timeout")),
            RelayError::ChainRejection {
                message_id: MessageId([1; 32]),
                reason: ChainRejection::InsufficientFunds("balance 0".to_string()),
            },
        ])
        .unwrap_err();

        let rendered = err.to_string();
        assert!(rendered.starts_with("2 message(s) failed:"));
        assert!(rendered.contains("store get failed: timeout"));
        assert!(rendered.contains("insufficient funds"));
    }

    #[test]
    fn test_rejection_maps_to_chain_rejection() {
        let err = RelayError::from_chain(
            MessageId([2; 32]),
            "submit",
            ChainError::Rejected(ChainRejection::AlreadyExecuted),
        );
        assert!(matches!(
            err,
            RelayError::ChainRejection { reason: ChainRejection::AlreadyExecuted, .. }
        ));
    }
}
