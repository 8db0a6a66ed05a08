//! EVM adapter tests
//!
//! These tests verify the JSON-RPC requests the EVM adapters send and how they interpret
//! node responses, using a mocked node.

use std::sync::Arc;
use std::time::Duration;

use modsec_relay::chain::evm_client::function_selector;
use modsec_relay::chain::{
    ChainError, ChainRejection, EventSource, EvmClient, EvmSubmitter, FilterSpec,
    TransactionSubmitter,
};
use modsec_relay::message::{AttestationPayload, MessageId};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    build_message, event_sig, test_signer, DUMMY_EVENT_SIG, DUMMY_EXECUTOR_ACCOUNT_EVM,
    DUMMY_OFF_RAMP_ADDR_EVM, DUMMY_ON_RAMP_ADDR_EVM,
};

fn client(server: &MockServer) -> Arc<EvmClient> {
    Arc::new(EvmClient::new(&server.uri(), Duration::from_secs(2)).unwrap())
}

fn submitter(server: &MockServer) -> EvmSubmitter {
    EvmSubmitter::new(client(server), DUMMY_OFF_RAMP_ADDR_EVM, DUMMY_EXECUTOR_ACCOUNT_EVM)
        .with_receipt_polling(Duration::from_millis(5), 3)
}

fn filter_spec() -> FilterSpec {
    FilterSpec {
        name: "source-message-sent".to_string(),
        address: DUMMY_ON_RAMP_ADDR_EVM.to_string(),
        event_sig: event_sig(),
    }
}

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result,
    }))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message },
    }))
}

/// Build an eth_getLogs entry carrying `message` in `block`.
fn evm_log(message: &modsec_relay::ProtocolMessage, block: u64, log_index: u64) -> serde_json::Value {
    json!({
        "address": DUMMY_ON_RAMP_ADDR_EVM,
        "topics": [DUMMY_EVENT_SIG, message.message_id.to_string()],
        "data": format!("0x{}", hex::encode(message.encode())),
        "blockNumber": format!("0x{:x}", block),
        "transactionHash": format!("0x{}", "ab".repeat(32)),
        "logIndex": format!("0x{:x}", log_index),
    })
}

// ============================================================================
// EVENT SOURCE
// ============================================================================

/// 1. Test: Filter Registry Is Idempotent
/// Verifies the in-process filter registry returns the same filter for a repeated spec.
/// Why: eth_getLogs is stateless; the registry alone guarantees a single filter.
#[tokio::test]
async fn test_filter_registry_is_idempotent() {
    let mock_server = MockServer::start().await;
    let client = client(&mock_server);

    let first = client.register_filter(&filter_spec()).await.unwrap();
    let second = client.register_filter(&filter_spec()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(client.filters().await.unwrap().len(), 1);
}

/// 2. Test: eth_getLogs Parsed And Ordered
/// Verifies logs are requested with the filter's address and topic, decoded, and ordered by block and index.
/// Why: Checkpoint recovery and polling assume ordered, decoded logs.
#[tokio::test]
async fn test_get_logs_parsed_and_ordered() {
    let mock_server = MockServer::start().await;
    let first = build_message(0);
    let second = build_message(1);

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_getLogs",
            "params": [{
                "address": DUMMY_ON_RAMP_ADDR_EVM,
                "topics": [DUMMY_EVENT_SIG],
                "fromBlock": "0x1",
                "toBlock": "0x10",
            }],
        })))
        .respond_with(rpc_result(json!([evm_log(&second, 9, 0), evm_log(&first, 3, 1)])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    let filter = client.register_filter(&filter_spec()).await.unwrap();
    let logs = client.logs(&filter, 1, 16).await.unwrap();

    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].block_number, 3);
    assert_eq!(logs[1].block_number, 9);
    assert_eq!(logs[0].decode_message().unwrap(), first);
    assert_eq!(logs[1].topics[1], *second.message_id.as_bytes());
}

/// 3. Test: Finalized Block From Block Tag
/// Verifies the finalized head is read via eth_getBlockByNumber("finalized").
/// Why: Only finalized blocks may be attested.
#[tokio::test]
async fn test_finalized_block_from_block_tag() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_getBlockByNumber",
            "params": ["finalized", false],
        })))
        .respond_with(rpc_result(json!({ "number": "0x2a", "hash": "0x00" })))
        .mount(&mock_server)
        .await;

    assert_eq!(client(&mock_server).latest_finalized_block().await.unwrap(), 42);
}

/// 4. Test: Node Error Is An RPC Failure
/// Verifies a generic JSON-RPC error is reported as a transport-level failure.
/// Why: Node hiccups must be retried, not treated as chain refusals.
#[tokio::test]
async fn test_node_error_is_rpc_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(rpc_error(-32000, "header not found"))
        .mount(&mock_server)
        .await;

    let result = client(&mock_server).latest_finalized_block().await;
    assert!(matches!(result, Err(ChainError::Rpc(_))));
}

// ============================================================================
// TRANSACTION SUBMITTER
// ============================================================================

/// 5. Test: isExecuted Via eth_call
/// Verifies the off-ramp is queried with the isExecuted selector and the ABI bool is decoded.
/// Why: The destination chain is the source of truth for execution state.
#[tokio::test]
async fn test_is_executed_via_eth_call() {
    let mock_server = MockServer::start().await;
    let executed = MessageId([0x01; 32]);
    let fresh = MessageId([0x02; 32]);
    let selector = hex::encode(function_selector("isExecuted(bytes32)"));

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_call",
            "params": [{
                "to": DUMMY_OFF_RAMP_ADDR_EVM,
                "data": format!("0x{}{}", selector, hex::encode(executed.as_bytes())),
            }, "latest"],
        })))
        .respond_with(rpc_result(json!(format!("0x{}1", "0".repeat(63)))))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_call",
            "params": [{
                "data": format!("0x{}{}", selector, hex::encode(fresh.as_bytes())),
            }],
        })))
        .respond_with(rpc_result(json!(format!("0x{}", "0".repeat(64)))))
        .mount(&mock_server)
        .await;

    let submitter = submitter(&mock_server);
    assert!(submitter.is_executed(&executed).await.unwrap());
    assert!(!submitter.is_executed(&fresh).await.unwrap());
}

fn execution_call() -> modsec_relay::message::ExecutionCall {
    let message = build_message(0);
    let signature = test_signer().sign(&message.hash()).unwrap();
    AttestationPayload::new(&message, signature)
        .decode_call(&message.message_id)
        .unwrap()
}

/// 6. Test: Submit Waits For Successful Receipt
/// Verifies execute() is sent from the executor account and a status 0x1 receipt completes it.
/// Why: A submission only counts once the chain confirms it.
#[tokio::test]
async fn test_submit_waits_for_successful_receipt() {
    let mock_server = MockServer::start().await;
    let tx_hash = format!("0x{}", "cd".repeat(32));

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_sendTransaction",
            "params": [{
                "from": DUMMY_EXECUTOR_ACCOUNT_EVM,
                "to": DUMMY_OFF_RAMP_ADDR_EVM,
            }],
        })))
        .respond_with(rpc_result(json!(tx_hash)))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_getTransactionReceipt",
            "params": [tx_hash],
        })))
        .respond_with(rpc_result(json!({ "status": "0x1", "transactionHash": tx_hash })))
        .mount(&mock_server)
        .await;

    submitter(&mock_server).submit(&execution_call()).await.unwrap();
}

/// 7. Test: Failed Receipt Is A Revert
/// Verifies a status 0x0 receipt surfaces as a Reverted rejection.
/// Why: A mined-but-failed transaction did not execute the message.
#[tokio::test]
async fn test_failed_receipt_is_revert() {
    let mock_server = MockServer::start().await;
    let tx_hash = format!("0x{}", "ef".repeat(32));

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_sendTransaction" })))
        .respond_with(rpc_result(json!(tx_hash)))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
        .respond_with(rpc_result(json!({ "status": "0x0" })))
        .mount(&mock_server)
        .await;

    let err = submitter(&mock_server).submit(&execution_call()).await.unwrap_err();
    assert!(matches!(err, ChainError::Rejected(ChainRejection::Reverted(_))));
}

/// 8. Test: Missing Receipt Times Out
/// Verifies a receipt that never appears is a transport-level failure after the polling budget.
/// Why: The transaction may still land; the executor must re-check rather than assume failure.
#[tokio::test]
async fn test_missing_receipt_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_sendTransaction" })))
        .respond_with(rpc_result(json!(format!("0x{}", "12".repeat(32)))))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
        .respond_with(rpc_result(serde_json::Value::Null))
        .expect(3)
        .mount(&mock_server)
        .await;

    let err = submitter(&mock_server).submit(&execution_call()).await.unwrap_err();
    assert!(matches!(err, ChainError::Rpc(_)));
}

/// 9. Test: Already Executed Revert Classified
/// Verifies an "already executed" revert from eth_sendTransaction maps to AlreadyExecuted.
/// Why: The executor absorbs exactly this rejection.
#[tokio::test]
async fn test_already_executed_revert_classified() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_sendTransaction" })))
        .respond_with(rpc_error(3, "execution reverted: message already executed"))
        .mount(&mock_server)
        .await;

    let err = submitter(&mock_server).submit(&execution_call()).await.unwrap_err();
    assert!(matches!(err, ChainError::Rejected(ChainRejection::AlreadyExecuted)));
}
