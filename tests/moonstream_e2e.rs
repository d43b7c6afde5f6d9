//! Moonstream client tests against a local mock API
//!
//! The mock serves the Query API (update request, then a result URL answering
//! 304 until the data is ready) and the Engine API leaderboard endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

use autocorns_core::rarity::{apply_rarity_multipliers, LeaderboardRow};
use autocorns_moonstream::{
    event_params, session_params, LeaderboardClient, MoonstreamConfig, MoonstreamError, QueryClient,
};

const TOKEN: &str = "test-access-token";

#[derive(Default)]
struct MockApi {
    base_url: String,
    /// Polls answered 304 before the data is served
    not_ready_polls: usize,
    polls: AtomicUsize,
    if_modified_since: Mutex<Vec<String>>,
    authorization: Mutex<Vec<String>>,
    update_body: Mutex<Option<Value>>,
    leaderboard_query: Mutex<HashMap<String, String>>,
    leaderboard_body: Mutex<Option<Value>>,
}

type Shared = Arc<MockApi>;

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn update_data(
    State(api): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    api.authorization.lock().unwrap().push(header(&headers, "authorization"));
    *api.update_body.lock().unwrap() = Some(body);
    Json(json!({ "url": format!("{}/results/{}", api.base_url, name) }))
}

async fn results(State(api): State<Shared>, headers: HeaderMap) -> Response {
    api.if_modified_since
        .lock()
        .unwrap()
        .push(header(&headers, "if-modified-since"));
    let polls = api.polls.fetch_add(1, Ordering::SeqCst) + 1;
    if polls <= api.not_ready_polls {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    Json(json!({
        "data": [
            { "address": "7", "score": 100, "points_data": { "wins": 1 } },
            { "address": "8", "score": "40", "points_data": {} },
        ]
    }))
    .into_response()
}

async fn push_scores(
    State(api): State<Shared>,
    Path(_id): Path<Uuid>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    api.authorization.lock().unwrap().push(header(&headers, "authorization"));
    *api.leaderboard_query.lock().unwrap() = query;
    *api.leaderboard_body.lock().unwrap() = Some(body);
    Json(json!({ "ok": true }))
}

async fn spawn_api(not_ready_polls: usize) -> Shared {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api = Arc::new(MockApi {
        base_url: format!("http://{}", listener.local_addr().unwrap()),
        not_ready_polls,
        ..MockApi::default()
    });

    let router = Router::new()
        .route("/queries/:name/update_data", post(update_data))
        .route("/results/:name", get(results))
        .route("/leaderboard/:id/scores", put(push_scores))
        .with_state(api.clone());

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    api
}

fn config(api: &MockApi, max_retries: u32) -> MoonstreamConfig {
    MoonstreamConfig {
        api_url: api.base_url.clone(),
        engine_api_url: api.base_url.clone(),
        interval_secs: 0.01,
        max_retries,
        ..MoonstreamConfig::new(TOKEN)
    }
}

#[tokio::test]
async fn test_update_then_poll_until_ready() {
    let api = spawn_api(2).await;
    let client = QueryClient::new(&config(&api, 0)).unwrap();

    let results = client
        .update_and_fetch("breeding_events", event_params(1_700_000_000, 1_700_086_400))
        .await
        .unwrap();

    assert_eq!(results["data"].as_array().unwrap().len(), 2);
    assert_eq!(api.polls.load(Ordering::SeqCst), 3);
    assert_eq!(
        api.update_body.lock().unwrap().clone().unwrap(),
        json!({ "params": { "start_timestamp": 1_700_000_000, "end_timestamp": 1_700_086_400 } })
    );
    assert_eq!(api.authorization.lock().unwrap()[0], format!("Bearer {}", TOKEN));

    let stamps = api.if_modified_since.lock().unwrap().clone();
    assert_eq!(stamps.len(), 3);
    assert!(stamps.iter().all(|s| s.ends_with(" GMT")));
    assert!(stamps.windows(2).all(|w| w[0] == w[1]), "one timestamp for the whole poll loop");
}

#[tokio::test]
async fn test_polling_gives_up_after_max_retries() {
    let api = spawn_api(usize::MAX).await;
    let client = QueryClient::new(&config(&api, 2)).unwrap();

    let err = client.update_and_fetch("never_ready", json!({})).await.unwrap_err();
    assert!(matches!(err, MoonstreamError::RetriesExhausted { attempts: 3 }));
    assert_eq!(api.polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_update_is_requested_again_after_polling_gives_up() {
    let api = spawn_api(3).await;
    let config = MoonstreamConfig {
        update_attempts: 2,
        ..config(&api, 1)
    };
    let client = QueryClient::new(&config).unwrap();

    let results = client
        .update_and_fetch("garden_of_forking_path_choices", session_params("0xabc", "12"))
        .await
        .unwrap();

    assert_eq!(results["data"].as_array().unwrap().len(), 2);
    assert_eq!(api.authorization.lock().unwrap().len(), 2, "two update requests");
    assert_eq!(api.polls.load(Ordering::SeqCst), 4);
    assert_eq!(
        api.update_body.lock().unwrap().clone().unwrap(),
        json!({ "params": { "contract_address": "0xabc", "session_id": "12" } })
    );
}

#[tokio::test]
async fn test_every_update_round_exhausted() {
    let api = spawn_api(usize::MAX).await;
    let config = MoonstreamConfig {
        update_attempts: 2,
        ..config(&api, 1)
    };

    let err = QueryClient::new(&config)
        .unwrap()
        .update_and_fetch("never_ready", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, MoonstreamError::RetriesExhausted { attempts: 4 }));
    assert_eq!(api.authorization.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_token_fails_before_any_request() {
    let api = spawn_api(0).await;
    let mut config = config(&api, 0);
    config.access_token.clear();

    assert!(matches!(QueryClient::new(&config), Err(MoonstreamError::MissingAccessToken)));
    assert!(matches!(LeaderboardClient::new(&config), Err(MoonstreamError::MissingAccessToken)));
    assert!(api.authorization.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_leaderboard_push_with_rarity_multipliers() {
    let api = spawn_api(0).await;
    let config = config(&api, 0);

    let results = QueryClient::new(&config)
        .unwrap()
        .update_and_fetch("throwing_shade", json!({}))
        .await
        .unwrap();
    let mut rows: Vec<LeaderboardRow> = serde_json::from_value(results["data"].clone()).unwrap();

    let multipliers: HashMap<String, f64> = [("7".to_string(), 1.5)].into_iter().collect();
    let missing = apply_rarity_multipliers(&mut rows, &multipliers).unwrap();
    assert_eq!(missing, vec!["8".to_string()]);

    let leaderboard_id = Uuid::new_v4();
    LeaderboardClient::new(&config)
        .unwrap()
        .push_scores(leaderboard_id, &rows)
        .await
        .unwrap();

    assert_eq!(
        api.leaderboard_query.lock().unwrap().get("normalize_addresses").map(String::as_str),
        Some("false")
    );
    let body = api.leaderboard_body.lock().unwrap().clone().unwrap();
    assert_eq!(body[0]["address"], "7");
    assert_eq!(body[0]["score"], "150");
    assert_eq!(body[0]["points_data"]["rarity_multiplier"], "1.5");
    assert_eq!(body[0]["points_data"]["wins"], 1);
    assert_eq!(body[1]["score"], "40");
    assert_eq!(body[1]["points_data"]["rarity_multiplier"], "1.0");
}

#[tokio::test]
async fn test_leaderboard_error_status_is_reported() {
    let api = spawn_api(0).await;
    let mut config = config(&api, 0);
    config.engine_api_url = format!("{}/missing", api.base_url);

    let err = LeaderboardClient::new(&config)
        .unwrap()
        .push_scores(Uuid::new_v4(), &[json!({ "address": "1", "score": 1 })])
        .await
        .unwrap_err();
    assert!(matches!(err, MoonstreamError::Server { status: 404, .. }));
}
