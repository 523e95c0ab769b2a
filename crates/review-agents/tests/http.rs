//! HTTP boundary over a loopback listener, heuristics only.

mod common;

use std::sync::Arc;

use evaluation::events::StreamReader;
use evaluation::{PersonaSet, RuntimeOptions};
use review_agents::server::{router, AppState};
use review_agents::BackendRegistry;
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn spawn_service() -> String {
    let registry: &'static BackendRegistry =
        Box::leak(Box::new(BackendRegistry::with_resolver(|_| None)));
    let state = Arc::new(AppState {
        personas: PersonaSet::builtin().unwrap(),
        defaults: RuntimeOptions::heuristic_only(),
        registry,
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state).into_make_service())
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

fn request_body() -> Value {
    json!({
        "summary": "Seed pitch for an async standup tool",
        "slides_text": "Slide 1: The problem\nSlide 2: Traction\nSlide 3: The ask",
        "slides_struct": serde_json::to_value(common::deck().slides_struct).unwrap(),
        "detail": "high"
    })
}

#[tokio::test]
async fn analyze_returns_full_response() {
    let base = spawn_service().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/analyze"))
        .json(&request_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let ids: Vec<&str> = body["personas"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["persona_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["investor", "domain_expert", "audience"]);
    assert!(body["personas"][0]["slide_evaluations"].is_array());
    assert!(body["consensus"]["overall_score"].is_u64());
    assert_eq!(body["slides_struct"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn input_errors_map_to_bad_request() {
    let base = spawn_service().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/analyze"))
        .json(&json!({ "summary": "no slides here" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("slide"));

    let resp = client
        .post(format!("{base}/api/analyze/stream"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn stream_endpoint_rebuilds_into_same_response() {
    let base = spawn_service().await;
    let client = reqwest::Client::new();

    let text = client
        .post(format!("{base}/api/analyze/stream"))
        .json(&request_body())
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let mut reader = StreamReader::new();
    reader.feed(&text);
    assert!(reader.is_done());
    assert_eq!(reader.skipped(), 0);
    let streamed = reader.finish().unwrap();

    let blocking: Value = client
        .post(format!("{base}/api/analyze"))
        .json(&request_body())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let mut streamed_ids: Vec<String> =
        streamed.personas.iter().map(|p| p.persona_id.clone()).collect();
    streamed_ids.sort();
    assert_eq!(streamed_ids, ["audience", "domain_expert", "investor"]);
    assert_eq!(
        json!(streamed.consensus),
        blocking["consensus"],
        "consensus is built in configuration order"
    );
}

#[tokio::test]
async fn supplementary_endpoints_and_health() {
    let base = spawn_service().await;
    let client = reqwest::Client::new();

    let reshuffle: Value = client
        .post(format!("{base}/api/reshuffle"))
        .json(&request_body())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reshuffle["proposed_order"].as_array().unwrap().len(), 3);

    let arc: Value = client
        .post(format!("{base}/api/emotional-arc"))
        .json(&request_body())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(arc["points"].as_array().unwrap().len(), 3);

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["personas"], 3);
    assert!(health["timestamp"].is_string());
}
