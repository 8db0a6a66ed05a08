//! HTTP Attestation Store Client
//!
//! Client for the attestation store wire protocol:
//!
//! - `GET {endpoint}/get/{key}`: 200 with the raw value, 404 when absent
//! - `POST {endpoint}/set/{key}` with the raw value as body: 200 on success
//!
//! Any other status or a transport failure is reported as an I/O error.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::{AttestationStore, StoreError};

/// [`AttestationStore`] talking to a remote store over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAttestationStore {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the store, without trailing slash
    endpoint: String,
}

impl HttpAttestationStore {
    /// Creates a new store client.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Base URL of the store (e.g., "http://127.0.0.1:8090")
    /// * `timeout` - Per-request timeout
    ///
    /// # Returns
    ///
    /// * `Ok(HttpAttestationStore)` - Successfully created client
    /// * `Err(StoreError)` - Failed to create the HTTP client
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AttestationStore for HttpAttestationStore {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let url = format!("{}/set/{}", self.endpoint, key);
        let response = self.client.post(&url).body(value).send().await?;

        if response.status() != StatusCode::OK {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                key: key.to_string(),
            });
        }

        debug!("Stored attestation under {}", key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = format!("{}/get/{}", self.endpoint, key);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(key.to_string())),
            status => Err(StoreError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            }),
        }
    }
}
