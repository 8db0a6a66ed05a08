//! Attestation Store Module
//!
//! Durable key→bytes storage for attestation payloads, keyed by message ID
//! (`0x` + 64 lowercase hex). The Verifier writes each payload once; the Executor reads it
//! any number of times. Last write wins; there is no deletion, TTL or versioning.
//!
//! Implementations:
//! - [`HttpAttestationStore`]: client for the store wire protocol
//! - [`InMemoryAttestationStore`]: process-local map, used by tests and single-process runs
//! - [`StoreServer`]: serves any [`AttestationStore`] over the wire protocol

pub mod http;
pub mod memory;
pub mod server;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{StorageConfig, StoreType};
use crate::error::RelayError;

pub use http::HttpAttestationStore;
pub use memory::InMemoryAttestationStore;
pub use server::StoreServer;

/// Failure reading from or writing to an attestation store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No value is stored under the key
    #[error("no attestation stored under key {0}")]
    NotFound(String),
    /// Transport failure or timeout
    #[error("attestation store request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The store answered with an unexpected status code
    #[error("attestation store returned HTTP {status} for key {key}")]
    Status { status: u16, key: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Key→bytes storage shared by the Verifier and the Executor.
#[async_trait]
pub trait AttestationStore: Send + Sync + Debug {
    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Returns the value stored under `key`, or [`StoreError::NotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Whether a value is stored under `key`.
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Builds the store selected by the storage configuration.
///
/// # Arguments
///
/// * `config` - Storage section of the relay configuration
///
/// # Returns
///
/// * `Ok(Arc<dyn AttestationStore>)` - Store ready for use
/// * `Err(RelayError::Configuration)` - Unknown store type, or the HTTP client could not be built
pub fn store_from_config(config: &StorageConfig) -> Result<Arc<dyn AttestationStore>, RelayError> {
    match config.store_type()? {
        StoreType::Memory => Ok(Arc::new(InMemoryAttestationStore::new())),
        StoreType::Http => {
            let store = HttpAttestationStore::new(
                &config.endpoint,
                Duration::from_millis(config.request_timeout_ms),
            )
            .map_err(|e| RelayError::configuration("storage.endpoint", e.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}
