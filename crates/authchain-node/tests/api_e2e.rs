//! End-to-end tests for the ledger HTTP API.
//!
//! These tests verify:
//! - Decision recording with and without quorum
//! - Block queries by index and proposal
//! - Validator management and its effect on quorum
//! - Verification and error payloads

use authchain_ledger::{ConsensusConfig, LedgerService};
use authchain_node::api::{cors_layer, create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Helper to extract JSON body from response
async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn create_test_app() -> (Router, Arc<LedgerService>) {
    let ledger = Arc::new(LedgerService::in_memory(ConsensusConfig::default()));
    let app = create_router(AppState::new(ledger.clone()), cors_layer(&[]));
    (app, ledger)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn decision(proposal: &str, checkpoint: &str) -> Value {
    json!({
        "proposal_id": proposal,
        "checkpoint_id": checkpoint,
        "tool_name": "sql_db_query",
        "tool_arguments": {"query": "DELETE FROM sessions WHERE expired = true"},
        "reasoning_summary": "clear expired sessions",
        "decision": {
            "approved": true,
            "decision_by": "erin",
            "timestamp": 1_700_000_050
        },
        "priority_result": {"tier": "high", "requires_approval": true, "reason": "writes to db"},
        "timestamp": 1_700_000_000
    })
}

async fn add_validator(app: &Router, id: &str) {
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/validators",
            &json!({"id": id, "name": format!("validator {}", id)}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_health() {
    let (app, _) = create_test_app();

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["chain_length"], 1);
    assert_eq!(body["latest_index"], 0);
    assert_eq!(body["active_validators"], 0);
    assert_eq!(body["quorum_size"], 1);
}

#[tokio::test]
async fn test_record_decision_finalizes_with_quorum() {
    let (app, ledger) = create_test_app();
    for id in ["v1", "v2", "v3"] {
        add_validator(&app, id).await;
    }

    let response = app
        .clone()
        .oneshot(post_json("/api/blocks", &decision("prop-1", "cp-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_eq!(body["status"], "finalized");
    assert_eq!(body["approved"], true);
    assert_eq!(body["proposal_id"], "prop-1");
    assert_eq!(body["block_index"], 1);
    assert_eq!(body["validators"], 3);

    let response = app.oneshot(get("/api/blocks/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let block = json_body(response).await;
    assert_eq!(block["data"]["tool_name"], "sql_db_query");
    assert_eq!(block["attestations"].as_array().unwrap().len(), 3);
    assert!(ledger.list_pending().is_empty());
}

#[tokio::test]
async fn test_record_decision_without_validators_is_pending() {
    let (app, _) = create_test_app();

    let response = app
        .clone()
        .oneshot(post_json("/api/blocks", &decision("prop-1", "cp-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["collected"], 0);
    assert_eq!(body["required"], 1);
    let hash = body["block_hash"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get("/api/consensus/pending"))
        .await
        .unwrap();
    let pending = json_body(response).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["hash"], hash.as_str());

    // A validator joins and the block is re-attested.
    add_validator(&app, "v1").await;
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/consensus/{}/reattest", hash),
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(json_body(response).await["status"], "finalized");

    let response = app
        .oneshot(post_json(
            &format!("/api/consensus/{}/reattest", hash),
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_record_decision_rejects_incomplete_payload() {
    let (app, ledger) = create_test_app();

    let mut payload = decision("prop-1", "cp-1");
    payload["decision"]["decision_by"] = json!("");
    let response = app
        .clone()
        .oneshot(post_json("/api/blocks", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("decision.decision_by"));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/blocks")
                .header("Content-Type", "application/json")
                .body(Body::from("{ not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(ledger.chain().len(), 1);
}

#[tokio::test]
async fn test_list_and_query_blocks() {
    let (app, _) = create_test_app();
    add_validator(&app, "v1").await;

    for (proposal, checkpoint) in [("prop-a", "cp-1"), ("prop-b", "cp-2"), ("prop-a", "cp-3")] {
        let response = app
            .clone()
            .oneshot(post_json("/api/blocks", &decision(proposal, checkpoint)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app.clone().oneshot(get("/api/blocks")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["length"], 4);
    assert_eq!(body["blocks"][0]["data"]["proposal_id"], "genesis");

    let response = app
        .clone()
        .oneshot(get("/api/blocks/proposal/prop-a"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["blocks"][1]["data"]["checkpoint_id"], "cp-3");

    let response = app
        .clone()
        .oneshot(get("/api/blocks/proposal/unknown"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.clone().oneshot(get("/api/blocks/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["kind"], "state");

    let response = app.oneshot(get("/api/blocks/abc")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_validator_lifecycle() {
    let (app, _) = create_test_app();
    for id in ["v1", "v2", "v3", "v4"] {
        add_validator(&app, id).await;
    }

    let response = app.clone().oneshot(get("/api/validators")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 4);
    assert_eq!(body["quorum_size"], 3);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/validators/v4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["validator_id"], "v4");
    assert_eq!(body["quorum_size"], 3);

    let response = app
        .clone()
        .oneshot(get("/api/validators?all=true"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 4);
    assert_eq!(body["validators"][3]["status"], "inactive");

    // Duplicate and unknown ids.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/validators",
            &json!({"id": "v1", "name": "again"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/validators/nobody")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_verify_chain() {
    let (app, _) = create_test_app();
    add_validator(&app, "v1").await;
    app.clone()
        .oneshot(post_json("/api/blocks", &decision("prop-1", "cp-1")))
        .await
        .unwrap();

    let response = app
        .oneshot(post_json("/api/verify", &json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["valid"], true);
    assert_eq!(body["length"], 2);
}

#[tokio::test]
async fn test_verify_reports_tampered_block() {
    let (app, ledger) = create_test_app();
    add_validator(&app, "v1").await;
    for checkpoint in ["cp-1", "cp-2", "cp-3"] {
        let response = app
            .clone()
            .oneshot(post_json("/api/blocks", &decision("prop-1", checkpoint)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let mut tampered = (*ledger.get_block(2).unwrap()).clone();
    tampered.data.decision.approved = false;
    ledger.chain().replace_block_unchecked(2, tampered);

    let response = app
        .oneshot(post_json("/api/verify", &json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = json_body(response).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["kind"], "integrity");
    assert_eq!(body["index"], 2);
}

#[tokio::test]
async fn test_stale_listing_starts_empty() {
    let (app, _) = create_test_app();

    let response = app.oneshot(get("/api/consensus/stale")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["count"], 0);
}
