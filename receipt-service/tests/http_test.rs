//! HTTP integration tests against the real router over an in-memory store.

mod common;

use chrono::{Duration, Utc};
use common::{user, TestApp};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

const ACCOUNT: &str = "X-Account-Number";
const ADMIN: &str = "X-Account-Admin";

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));

    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "receipt-service");
}

#[tokio::test]
async fn readiness_check_works() {
    let app = TestApp::spawn().await;

    let response = Client::new()
        .get(format!("{}/ready", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_endpoint_works() {
    let app = TestApp::spawn().await;

    let response = Client::new()
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert!(response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap_or("").contains("text/plain"))
        .unwrap_or(false));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::spawn().await;

    let response = Client::new()
        .get(format!("{}/health", app.address))
        .header("x-request-id", "req-42")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn listing_requires_account_header() {
    let app = TestApp::spawn().await;

    let response = Client::new()
        .get(format!("{}/receipts", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn listing_backfills_missed_periods() {
    let app = TestApp::spawn().await;
    app.store
        .insert_user(user("ACC-1", "END", Utc::now() - Duration::days(120)))
        .await;

    let response = Client::new()
        .get(format!("{}/receipts", app.address))
        .header(ACCOUNT, "ACC-1")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let total = body["total"].as_u64().unwrap();
    assert!(total >= 2, "expected backfilled receipts, got {}", body);
    assert_eq!(body["receipts"][0]["status"], "FAILED");
    assert_eq!(body["page"], 1);
    assert_eq!(body["limit"], 20);
}

#[tokio::test]
async fn listing_rejects_out_of_range_limit() {
    let app = TestApp::spawn().await;
    app.store
        .insert_user(user("ACC-1", "END", Utc::now()))
        .await;

    let response = Client::new()
        .get(format!("{}/receipts?limit=500", app.address))
        .header(ACCOUNT, "ACC-1")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn submit_and_review_flow() {
    let app = TestApp::spawn().await;
    app.store
        .insert_user(user("ACC-1", "MID", Utc::now()))
        .await;
    let client = Client::new();

    let response = client
        .post(format!("{}/receipts", app.address))
        .header(ACCOUNT, "ACC-1")
        .json(&json!({
            "reference_type": "GCASH",
            "reference_number": "GC-0001",
            "receipt_name": "proof.jpg"
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["status"], "PENDING");
    assert_eq!(created["cutoff"], "MID");
    let id = created["id"].as_str().unwrap().to_string();

    // Account holders cannot review.
    let response = client
        .post(format!("{}/receipts/{}/review", app.address, id))
        .header(ACCOUNT, "ACC-1")
        .json(&json!({ "decision": "ACCEPTED" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .post(format!("{}/receipts/{}/review", app.address, id))
        .header(ACCOUNT, "ADMIN-1")
        .header(ADMIN, "true")
        .json(&json!({ "decision": "ACCEPTED" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reviewed: Value = response.json().await.unwrap();
    assert_eq!(reviewed["status"], "ACCEPTED");

    let response = client
        .post(format!("{}/receipts/{}/review", app.address, id))
        .header(ACCOUNT, "ADMIN-1")
        .header(ADMIN, "true")
        .json(&json!({ "decision": "DENIED", "reason": "late" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    assert_eq!(app.store.all_history().await.len(), 1);
}

#[tokio::test]
async fn submit_requires_reference_number() {
    let app = TestApp::spawn().await;
    app.store
        .insert_user(user("ACC-1", "END", Utc::now()))
        .await;

    let response = Client::new()
        .post(format!("{}/receipts", app.address))
        .header(ACCOUNT, "ACC-1")
        .json(&json!({ "reference_number": "" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn reviewing_unknown_receipt_is_not_found() {
    let app = TestApp::spawn().await;

    let response = Client::new()
        .post(format!("{}/receipts/missing/review", app.address))
        .header(ACCOUNT, "ADMIN-1")
        .header(ADMIN, "1")
        .json(&json!({ "decision": "DENIED" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
