//! Integration tests for [`AlloyRpcAdapter`] against a mocked JSON-RPC
//! HTTP peer, grounded in the same `wiremock` request/response shape
//! used to test the corpus's other RPC client.
//!
//! No live network or testnet access is required or used.

mod common;

use chainfinity_indexer::ports::{LogFilter, RpcAdapter};
use chainfinity_indexer::rpc::connect_http;
use chainfinity_indexer::types::{BlockNumber, EthAddress};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_log_json(block_number: &str, log_index: &str) -> serde_json::Value {
    serde_json::json!({
        "address": "0x1234567890123456789012345678901234567890",
        "topics": ["0x0000000000000000000000000000000000000000000000000000000000000009"],
        "data": "0xdeadbeef",
        "blockNumber": block_number,
        "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000001",
        "transactionIndex": "0x0",
        "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000000",
        "logIndex": log_index,
        "removed": false
    })
}

#[tokio::test]
async fn get_logs_parses_logs_returned_by_the_rpc_peer() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(serde_json::json!({"method": "eth_getLogs"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [sample_log_json("0x64", "0x0")]
        })))
        .mount(&mock_server)
        .await;

    let adapter = connect_http(&mock_server.uri()).expect("connect_http");
    let filter = LogFilter {
        addresses: vec![EthAddress::from_hex("0x1234567890123456789012345678901234567890").unwrap()],
        topics: vec![],
        from_block: BlockNumber::new(100),
        to_block: BlockNumber::new(100),
    };

    let logs = adapter.get_logs(&filter).await.expect("get_logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].block_number, BlockNumber::new(100));
    assert_eq!(logs[0].log_index, 0);
    assert_eq!(logs[0].data, vec![0xde, 0xad, 0xbe, 0xef]);
}

#[tokio::test]
async fn get_logs_sorts_results_by_block_then_log_index() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [sample_log_json("0x65", "0x1"), sample_log_json("0x64", "0x0")]
        })))
        .mount(&mock_server)
        .await;

    let adapter = connect_http(&mock_server.uri()).expect("connect_http");
    let filter = LogFilter {
        addresses: vec![],
        topics: vec![],
        from_block: BlockNumber::new(100),
        to_block: BlockNumber::new(101),
    };

    let logs = adapter.get_logs(&filter).await.expect("get_logs");
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].block_number, BlockNumber::new(100));
    assert_eq!(logs[1].block_number, BlockNumber::new(101));
}

#[tokio::test]
async fn get_logs_surfaces_an_rpc_error_response_as_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "query returned more than 10000 results"}
        })))
        .mount(&mock_server)
        .await;

    let adapter = connect_http(&mock_server.uri()).expect("connect_http");
    let filter = LogFilter {
        addresses: vec![],
        topics: vec![],
        from_block: BlockNumber::ZERO,
        to_block: BlockNumber::new(1_000_000),
    };

    let result = adapter.get_logs(&filter).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn batch_get_logs_issues_one_request_per_filter() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": []
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let adapter = connect_http(&mock_server.uri()).expect("connect_http");
    let filters = vec![
        LogFilter { addresses: vec![], topics: vec![], from_block: BlockNumber::new(1), to_block: BlockNumber::new(10) },
        LogFilter { addresses: vec![], topics: vec![], from_block: BlockNumber::new(11), to_block: BlockNumber::new(20) },
    ];

    let results = adapter.batch_get_logs(&filters).await.expect("batch_get_logs");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Vec::is_empty));
}

#[test]
fn connect_http_rejects_an_unparseable_url() {
    let result = connect_http("not a url");
    assert!(result.is_err());
}
