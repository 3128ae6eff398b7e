//! Integration tests for the Blogochain HTTP endpoints
//!
//! Each test builds the full router over a fresh ledger and drives it with
//! an in-process test server.

use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use blogochain::api::{build_api_router, AppState};
use blogochain::blockchain::Blockchain;
use blogochain::commands::Commands;
use blogochain::config::{HubConfig, SessionConfig};
use blogochain::hub::Hub;

fn test_server(difficulty: u32) -> TestServer {
    let ledger = Arc::new(Blockchain::new(difficulty).expect("Failed to create blockchain"));
    let hub_config = HubConfig {
        tick_interval: Duration::from_secs(3600),
        viewer_queue_capacity: 16,
    };
    let (hub, _task) = Hub::spawn(Arc::clone(&ledger), hub_config);
    let state = AppState::new(Commands::new(ledger, hub), SessionConfig::default());

    TestServer::new(build_api_router(state, "web")).expect("Failed to create test server")
}

#[tokio::test]
async fn test_health_and_empty_ledger() {
    let server = test_server(0);

    let response = server.get("/api/health").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["chain_len"], 1);
    assert!(json["timestamp"].is_string());

    let response = server.get("/api/chain").await;
    assert_eq!(response.status_code(), 200);
    let chain: Value = response.json();
    assert_eq!(chain.as_array().unwrap().len(), 1);
    assert_eq!(chain[0]["prev_hash"], "0");

    let response = server.get("/api/pending").await;
    let pending: Vec<String> = response.json();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_add_mine_and_search() {
    let server = test_server(1);

    let response = server.post("/api/tx").json(&json!({ "data": "Hello world" })).await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["message"], "Transaction added successfully");

    server.post("/api/tx").json(&json!({ "data": "second" })).await;
    let pending: Vec<String> = server.get("/api/pending").await.json();
    assert_eq!(pending, vec!["Hello world".to_string(), "second".to_string()]);

    let response = server.post("/api/mine").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["message"], "Block mined successfully");
    assert_eq!(json["block"]["index"], 1);
    assert!(json["block"]["hash"].as_str().unwrap().starts_with('0'));

    let response = server.get("/api/search").add_query_param("q", "HELLO").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
    assert_eq!(json["results"][0]["index"], 1);

    let json: Value = server.get("/api/validate").await.json();
    assert_eq!(json["valid"], true);
    assert_eq!(json["blocks"], 2);
}

#[tokio::test]
async fn test_mine_with_nothing_pending() {
    let server = test_server(0);

    let response = server.post("/api/mine").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["message"], "No pending transactions to mine");
    assert!(json.get("block").is_none());

    let chain: Value = server.get("/api/chain").await.json();
    assert_eq!(chain.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let server = test_server(0);

    let response = server.post("/api/tx").json(&json!({ "data": "" })).await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert_eq!(json["error"], "Transaction data cannot be empty");

    let response = server.get("/api/search").await;
    assert_eq!(response.status_code(), 400);

    let response = server.post("/api/difficulty").json(&json!({ "difficulty": -1 })).await;
    assert_eq!(response.status_code(), 400);

    let response = server.post("/api/difficulty").json(&json!({})).await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_difficulty_roundtrip() {
    let server = test_server(0);

    let json: Value = server.get("/api/difficulty").await.json();
    assert_eq!(json["difficulty"], 0);

    let response = server.post("/api/difficulty").json(&json!({ "difficulty": 3 })).await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["difficulty"], 3);

    let json: Value = server.get("/api/difficulty").await.json();
    assert_eq!(json["difficulty"], 3);
}
