//! Unit tests for configuration management
//!
//! These tests verify configuration loading, parsing, defaults and validation
//! without requiring external services.

use modsec_relay::config::{ChainFamily, Config, StoreType};
use modsec_relay::crypto::{AttestationSigner, SignatureScheme};
use modsec_relay::RelayError;
#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{build_test_config, build_test_config_with_http_store, TEST_DEST_SELECTOR, TEST_SOURCE_SELECTOR};

/// Assert that `config` fails validation with a configuration error naming `field`.
fn assert_rejects_field(config: &Config, field: &str) {
    match config.validate() {
        Err(RelayError::Configuration { field: actual, reason }) => {
            assert_eq!(actual, field, "unexpected field (reason: {})", reason);
        }
        other => panic!("expected configuration error for {}, got {:?}", field, other),
    }
}

/// 1. Test: Valid Config Passes Validation
/// Verifies that the test configuration raises no error.
/// Why: Every negative test below mutates exactly one field of this baseline.
#[test]
fn test_valid_config_passes_validation() {
    let config = build_test_config();
    assert!(config.validate().is_ok());
    assert_eq!(config.source_family().unwrap(), ChainFamily::Evm);
    assert_eq!(config.lane().source_chain_selector, TEST_SOURCE_SELECTOR);
    assert_eq!(config.lane().dest_chain_selector, TEST_DEST_SELECTOR);
}

/// 2. Test: Zero Chain Selectors Rejected
/// Verifies that a zero selector on either side names that side's field.
/// Why: A zero selector cannot identify a lane.
#[test]
fn test_zero_chain_selectors_rejected() {
    let mut config = build_test_config();
    config.source_chain.chain_selector = 0;
    assert_rejects_field(&config, "source_chain.chain_selector");

    let mut config = build_test_config();
    config.dest_chain.chain_selector = 0;
    assert_rejects_field(&config, "dest_chain.chain_selector");
}

/// 3. Test: Chain Family Rules
/// Verifies unknown families and mismatched source/destination families are rejected.
/// Why: The family drives address formats and the signature scheme.
#[test]
fn test_chain_family_rules() {
    let mut config = build_test_config();
    config.source_chain.family = "cosmos".to_string();
    assert_rejects_field(&config, "source_chain.family");

    let mut config = build_test_config();
    config.dest_chain.family = "svm".to_string();
    assert_rejects_field(&config, "dest_chain.family");
}

/// 4. Test: Malformed Addresses Rejected
/// Verifies on-ramp, off-ramp and executor account addresses are checked for the family.
/// Why: A malformed address would only fail later, at the first RPC call.
#[test]
fn test_malformed_addresses_rejected() {
    let mut config = build_test_config();
    config.source_chain.on_ramp_addr = "0x123".to_string();
    assert_rejects_field(&config, "source_chain.on_ramp_addr");

    let mut config = build_test_config();
    config.dest_chain.off_ramp_addr = "not-an-address".to_string();
    assert_rejects_field(&config, "dest_chain.off_ramp_addr");

    let mut config = build_test_config();
    config.dest_chain.executor_account = None;
    assert_rejects_field(&config, "dest_chain.executor_account");
}

/// 5. Test: RPC URLs Must Be HTTP
/// Verifies non-URL and non-http(s) RPC endpoints are rejected.
/// Why: Both chain adapters speak JSON-RPC over HTTP.
#[test]
fn test_rpc_urls_must_be_http() {
    let mut config = build_test_config();
    config.source_chain.rpc_url = "ftp://127.0.0.1:8545".to_string();
    assert_rejects_field(&config, "source_chain.rpc_url");

    let mut config = build_test_config();
    config.dest_chain.rpc_url = "not a url".to_string();
    assert_rejects_field(&config, "dest_chain.rpc_url");
}

/// 6. Test: Event Signature Must Be 32 Bytes
/// Verifies short and non-hex event signatures are rejected.
/// Why: The signature is used verbatim as topic 0 in log filters.
#[test]
fn test_event_signature_must_be_32_bytes() {
    let mut config = build_test_config();
    config.verifier.message_sent_event_sig = "0x1234".to_string();
    assert_rejects_field(&config, "verifier.message_sent_event_sig");

    let mut config = build_test_config();
    config.verifier.message_sent_event_sig = "zz".repeat(32);
    assert_rejects_field(&config, "verifier.message_sent_event_sig");
}

/// 7. Test: Storage Settings Validated
/// Verifies unknown store types and missing HTTP endpoints are rejected.
/// Why: The store is the only hand-off between verifier and executor.
#[test]
fn test_storage_settings_validated() {
    let mut config = build_test_config();
    config.storage.store_type = "redis".to_string();
    assert_rejects_field(&config, "storage.store_type");

    let config = build_test_config_with_http_store("");
    assert_rejects_field(&config, "storage.endpoint");

    let config = build_test_config_with_http_store("http://127.0.0.1:8090");
    assert!(config.validate().is_ok());
    assert_eq!(config.storage.store_type().unwrap(), StoreType::Http);
}

/// 8. Test: Zero Intervals Rejected
/// Verifies polling intervals and the log query range must be non-zero.
/// Why: A zero interval would spin the poll loop.
#[test]
fn test_zero_intervals_rejected() {
    let mut config = build_test_config();
    config.verifier.polling_interval_ms = 0;
    assert_rejects_field(&config, "verifier.polling_interval_ms");

    let mut config = build_test_config();
    config.executor.polling_interval_ms = 0;
    assert_rejects_field(&config, "executor.polling_interval_ms");

    let mut config = build_test_config();
    config.verifier.log_query_block_range = 0;
    assert_rejects_field(&config, "verifier.log_query_block_range");
}

/// 9. Test: SVM Addresses Accept Base58
/// Verifies an SVM lane accepts base58 program addresses.
/// Why: Solana addresses are conventionally base58, not hex.
#[test]
fn test_svm_addresses_accept_base58() {
    let mut config = build_test_config();
    config.source_chain.family = "svm".to_string();
    config.dest_chain.family = "svm".to_string();
    config.source_chain.on_ramp_addr = bs58::encode([5u8; 32]).into_string();
    config.dest_chain.off_ramp_addr = bs58::encode([6u8; 32]).into_string();
    config.dest_chain.executor_account = None;

    assert!(config.validate().is_ok());
}

/// 10. Test: Template Loads And Validates
/// Verifies the shipped template parses and passes validation.
/// Why: Operators start from the template.
#[test]
fn test_template_loads_and_validates() {
    let config = Config::load_from_path("config/modsec-relay.template.toml").unwrap();
    assert_eq!(config.verifier.polling_interval_ms, 1000);
    assert_eq!(config.verifier.signer_private_key_env, "MODSEC_VERIFIER_PRIVATE_KEY");
    assert_eq!(config.storage.store_type().unwrap(), StoreType::Http);
}

/// 11. Test: Defaults Applied When Omitted
/// Verifies optional sections and fields fall back to their defaults.
/// Why: Minimal configs must stay short.
#[test]
fn test_defaults_applied_when_omitted() {
    let minimal = r#"
        [source_chain]
        name = "src"
        rpc_url = "http://127.0.0.1:8545"
        chain_selector = 1
        family = "evm"
        on_ramp_addr = "0x00000000000000000000000000000000000000a1"

        [dest_chain]
        name = "dst"
        rpc_url = "http://127.0.0.1:8546"
        chain_selector = 2
        family = "evm"
        off_ramp_addr = "0x00000000000000000000000000000000000000b2"
        executor_account = "0x00000000000000000000000000000000000000c3"

        [verifier]
        message_sent_event_sig = "0x00000000000000000000000000000000000000000000000000000000000000e5"

        [storage]
        endpoint = "http://127.0.0.1:8090"
    "#;

    let config: Config = toml::from_str(minimal).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.verifier.polling_interval_ms, 1000);
    assert_eq!(config.verifier.signer_private_key_env, "MODSEC_VERIFIER_PRIVATE_KEY");
    assert_eq!(config.verifier.log_query_block_range, 1000);
    assert_eq!(config.verifier.start_block, 0);
    assert_eq!(config.executor.polling_interval_ms, 1000);
    assert_eq!(config.executor.start_block, 0);
    assert_eq!(config.storage.store_type, "http");
}

/// 12. Test: Missing Config File
/// Verifies load_from_path reports a missing file with copy instructions.
/// Why: The first run without a config must explain what to do.
#[test]
fn test_missing_config_file() {
    let err = Config::load_from_path("config/does-not-exist.toml").unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert!(err.to_string().contains("modsec-relay.template.toml"));
}

/// 13. Test: Signer Loads From Environment
/// Verifies the signer picks up the key named in the config and the EVM scheme.
/// Why: Keys never live in the config file.
#[test]
fn test_signer_loads_from_environment() {
    let config = build_test_config();
    let signer = AttestationSigner::from_config(&config).unwrap();
    assert_eq!(signer.scheme(), SignatureScheme::EcdsaSecp256k1);

    let mut missing = build_test_config();
    missing.verifier.signer_private_key_env = "TEST_MODSEC_UNSET_KEY_VAR".to_string();
    let err = AttestationSigner::from_config(&missing).unwrap_err();
    assert!(err.to_string().contains("TEST_MODSEC_UNSET_KEY_VAR"));
}
