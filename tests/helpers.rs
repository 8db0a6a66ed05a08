//! Shared test helpers for integration tests
//!
//! The module is organized into several categories:
//! - **Constants**: Dummy addresses, selectors and event signatures
//! - **Configuration Builders**: Functions to create valid test configurations
//! - **Message Builders**: Protocol messages with correctly derived IDs
//! - **Service Builders**: Verifier and executor wired to simulated chains
//! - **Test Doubles**: Stores with injectable failures

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{Rng, RngCore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modsec_relay::chain::{ChainError, EventSource, FilterSpec, Log, RegisteredFilter, SimulatedChain};
use modsec_relay::config::{
    Config, DestChainConfig, ExecutorConfig, SourceChainConfig, StorageConfig, VerifierConfig,
};
use modsec_relay::crypto::{AttestationSigner, SignatureScheme};
use modsec_relay::message::{AttestationPayload, MessageId, ProtocolMessage, TokenAmount};
use modsec_relay::storage::{AttestationStore, InMemoryAttestationStore, StoreError};
use modsec_relay::{Executor, ExecutorSettings, Verifier, VerifierSettings};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Dummy on-ramp contract address (EVM format, 20 bytes)
pub const DUMMY_ON_RAMP_ADDR_EVM: &str = "0x00000000000000000000000000000000000000a1";

/// Dummy off-ramp contract address (EVM format, 20 bytes)
pub const DUMMY_OFF_RAMP_ADDR_EVM: &str = "0x00000000000000000000000000000000000000b2";

/// Dummy node-managed executor account (EVM format, 20 bytes)
pub const DUMMY_EXECUTOR_ACCOUNT_EVM: &str = "0x00000000000000000000000000000000000000c3";

/// Dummy message-sent event signature (32 bytes)
pub const DUMMY_EVENT_SIG: &str =
    "0x00000000000000000000000000000000000000000000000000000000000000e5";

/// Source chain selector used by test configurations
pub const TEST_SOURCE_SELECTOR: u64 = 16015286601757825753;

/// Destination chain selector used by test configurations
pub const TEST_DEST_SELECTOR: u64 = 14767482510784806043;

/// Fixed signer secret for tests that do not go through the environment
pub const TEST_SIGNER_SECRET: [u8; 32] = [0x42; 32];

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

/// Build a valid EVM test configuration with a fresh signer key.
/// The key is encoded using standard Base64 and set as an environment variable with a
/// unique name; the config references it via signer_private_key_env.
pub fn build_test_config() -> Config {
    let mut rng = rand::thread_rng();
    let mut sk_bytes = [0u8; 32];
    rng.fill_bytes(&mut sk_bytes);
    // Keep the secret a valid secp256k1 scalar
    sk_bytes[0] = 0x01;

    // Use unique env var names per invocation to avoid parallel test conflicts
    let unique_id: u64 = rng.gen();
    let private_key_env_name = format!("TEST_MODSEC_SIGNER_KEY_{}", unique_id);
    std::env::set_var(&private_key_env_name, general_purpose::STANDARD.encode(sk_bytes));

    Config {
        source_chain: SourceChainConfig {
            name: "Source EVM".to_string(),
            rpc_url: "http://127.0.0.1:18545".to_string(),
            chain_selector: TEST_SOURCE_SELECTOR,
            family: "evm".to_string(),
            on_ramp_addr: DUMMY_ON_RAMP_ADDR_EVM.to_string(),
            request_timeout_ms: 2000,
        },
        dest_chain: DestChainConfig {
            name: "Destination EVM".to_string(),
            rpc_url: "http://127.0.0.1:18546".to_string(),
            chain_selector: TEST_DEST_SELECTOR,
            family: "evm".to_string(),
            off_ramp_addr: DUMMY_OFF_RAMP_ADDR_EVM.to_string(),
            executor_account: Some(DUMMY_EXECUTOR_ACCOUNT_EVM.to_string()),
            request_timeout_ms: 2000,
        },
        verifier: VerifierConfig {
            message_sent_event_sig: DUMMY_EVENT_SIG.to_string(),
            polling_interval_ms: 10,
            signer_private_key_env: private_key_env_name,
            log_query_block_range: 4,
            store_lookup_concurrency: 4,
            start_block: 0,
        },
        executor: ExecutorConfig {
            polling_interval_ms: 10,
            start_block: 0,
        },
        storage: StorageConfig {
            store_type: "memory".to_string(),
            endpoint: String::new(),
            request_timeout_ms: 2000,
        },
    }
}

/// Build a test configuration pointing at an HTTP attestation store.
pub fn build_test_config_with_http_store(endpoint: &str) -> Config {
    let mut config = build_test_config();
    config.storage.store_type = "http".to_string();
    config.storage.endpoint = endpoint.to_string();
    config
}

/// Decoded [`DUMMY_EVENT_SIG`].
pub fn event_sig() -> [u8; 32] {
    let mut sig = [0u8; 32];
    sig[31] = 0xe5;
    sig
}

// ============================================================================
// MESSAGE BUILDERS
// ============================================================================

/// Build a message on the test lane with the given sequence number.
pub fn build_message(sequence_number: u64) -> ProtocolMessage {
    build_message_for_lane(sequence_number, TEST_SOURCE_SELECTOR, TEST_DEST_SELECTOR)
}

/// Build a message for an arbitrary lane. The message ID is derived from the content.
pub fn build_message_for_lane(sequence_number: u64, source: u64, dest: u64) -> ProtocolMessage {
    let mut message = ProtocolMessage {
        message_id: MessageId::default(),
        source_chain_selector: source,
        dest_chain_selector: dest,
        sequence_number,
        sender: vec![0x11; 20],
        receiver: vec![0x22; 20],
        data: format!("payload-{}", sequence_number).into_bytes(),
        fee_token: vec![0x33; 20],
        fee_token_amount: 1_000,
        token_amounts: vec![TokenAmount {
            token: vec![0x44; 20],
            amount: 10 + sequence_number as u128,
        }],
        extra_args: vec![],
    };
    message.message_id = message.compute_message_id();
    message
}

/// Emit messages with sequence numbers `0..count` on `chain`, one block each.
pub async fn emit_messages(chain: &SimulatedChain, count: u64) -> Vec<(ProtocolMessage, u64)> {
    let mut emitted = Vec::new();
    for sequence_number in 0..count {
        let message = build_message(sequence_number);
        let block = chain
            .emit_message(DUMMY_ON_RAMP_ADDR_EVM, event_sig(), &message)
            .await;
        emitted.push((message, block));
    }
    emitted
}

/// Signer backed by [`TEST_SIGNER_SECRET`].
pub fn test_signer() -> Arc<AttestationSigner> {
    Arc::new(
        AttestationSigner::from_secret(&TEST_SIGNER_SECRET, SignatureScheme::EcdsaSecp256k1)
            .unwrap(),
    )
}

/// Write a valid attestation for `message` directly into `store`.
pub async fn attest_directly(store: &dyn AttestationStore, message: &ProtocolMessage) {
    let signature = test_signer().sign(&message.hash()).unwrap();
    let payload = AttestationPayload::new(message, signature);
    store
        .set(&message.message_id.store_key(), payload.to_bytes())
        .await
        .unwrap();
}

// ============================================================================
// SERVICE BUILDERS
// ============================================================================

/// Build a verifier over `source` and `store` using the test configuration.
pub fn build_verifier(source: Arc<SimulatedChain>, store: Arc<dyn AttestationStore>) -> Arc<Verifier> {
    let config = build_test_config();
    Arc::new(Verifier::new(
        source,
        store,
        test_signer(),
        VerifierSettings::from_config(&config).unwrap(),
    ))
}

/// Build a verifier whose checkpoint recovery starts at `start_block`.
pub fn build_verifier_from_block(
    source: Arc<dyn EventSource>,
    store: Arc<dyn AttestationStore>,
    start_block: u64,
) -> Arc<Verifier> {
    let mut config = build_test_config();
    config.verifier.start_block = start_block;
    Arc::new(Verifier::new(
        source,
        store,
        test_signer(),
        VerifierSettings::from_config(&config).unwrap(),
    ))
}

/// Build an executor reading `source`, submitting to `dest`.
pub fn build_executor(
    source: Arc<SimulatedChain>,
    dest: Arc<SimulatedChain>,
    store: Arc<dyn AttestationStore>,
) -> Arc<Executor> {
    let config = build_test_config();
    Arc::new(Executor::new(
        source,
        dest,
        store,
        ExecutorSettings::from_config(&config).unwrap(),
    ))
}

/// Poll `condition` every 5ms until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition().await
}

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// In-memory store whose writes fail for selected keys.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryAttestationStore,
    failing_keys: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_for(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_keys.lock().unwrap().clear();
    }
}

#[async_trait]
impl AttestationStore for FlakyStore {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let failing = self.failing_keys.lock().unwrap().contains(key);
        if failing {
            return Err(StoreError::Status {
                status: 503,
                key: key.to_string(),
            });
        }
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key).await
    }
}

/// Event source recording every `logs` range it is asked for.
#[derive(Debug)]
pub struct RecordingSource {
    pub inner: Arc<SimulatedChain>,
    queried_ranges: Mutex<Vec<(u64, u64)>>,
}

impl RecordingSource {
    pub fn new(inner: Arc<SimulatedChain>) -> Self {
        Self {
            inner,
            queried_ranges: Mutex::new(Vec::new()),
        }
    }

    pub fn queried_ranges(&self) -> Vec<(u64, u64)> {
        self.queried_ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for RecordingSource {
    async fn register_filter(&self, spec: &FilterSpec) -> Result<RegisteredFilter, ChainError> {
        self.inner.register_filter(spec).await
    }

    async fn filters(&self) -> Result<Vec<RegisteredFilter>, ChainError> {
        self.inner.filters().await
    }

    async fn logs(
        &self,
        filter: &RegisteredFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        self.queried_ranges.lock().unwrap().push((from_block, to_block));
        self.inner.logs(filter, from_block, to_block).await
    }

    async fn latest_finalized_block(&self) -> Result<u64, ChainError> {
        self.inner.latest_finalized_block().await
    }
}
