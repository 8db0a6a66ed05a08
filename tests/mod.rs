//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    attest_directly, build_executor, build_message, build_message_for_lane, build_test_config,
    build_test_config_with_http_store, build_verifier, build_verifier_from_block, emit_messages,
    event_sig, test_signer, wait_until, FlakyStore, RecordingSource, DUMMY_EVENT_SIG,
    DUMMY_EXECUTOR_ACCOUNT_EVM, DUMMY_OFF_RAMP_ADDR_EVM, DUMMY_ON_RAMP_ADDR_EVM,
    TEST_DEST_SELECTOR, TEST_SIGNER_SECRET, TEST_SOURCE_SELECTOR,
};
