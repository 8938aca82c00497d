//! REST surface tests: the full router served over a local socket and
//! exercised with a real HTTP client.

use std::sync::Arc;

use apipulse::api::state::AppState;
use apipulse::executor::Execute;
use apipulse::model::{HttpMethod, Run, RunStatus, Schedule, ScheduleId, Target};
use apipulse::scheduler::ScheduleEngine;
use apipulse::storage::{open_pool, NewRun, Pool, RunOutcome, RunStore};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Executor stub; API tests only use long cadences, so it never runs.
struct StubExecutor;

#[async_trait]
impl Execute for StubExecutor {
    async fn execute(&self, schedule: &Schedule, target: &Target) -> Run {
        Run {
            id: 0,
            schedule_id: schedule.id,
            status: RunStatus::Success,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            latency_ms: Some(0.1),
            http_status: Some(200),
            response_size_bytes: Some(0),
            response_snippet: None,
            error_type: None,
            error_message: None,
            request_url: target.url.clone(),
            request_method: target.method,
        }
    }
}

/// Serve the full router on an ephemeral port. Returns the root base URL.
async fn spawn_api() -> (TempDir, Pool, String) {
    let dir = TempDir::new().unwrap();
    let pool = open_pool(&dir.path().join("api.db")).unwrap();
    let engine = ScheduleEngine::new(pool.clone(), Arc::new(StubExecutor));
    let app = apipulse::api::router(AppState {
        pool: pool.clone(),
        engine,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (dir, pool, format!("http://{addr}"))
}

async fn create_target(client: &reqwest::Client, api: &str, name: &str) -> Value {
    let resp = client
        .post(format!("{api}/targets"))
        .json(&json!({ "name": name, "url": "https://example.com/health" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

async fn create_schedule(
    client: &reqwest::Client,
    api: &str,
    name: &str,
    target_id: i64,
) -> Value {
    let resp = client
        .post(format!("{api}/schedules"))
        .json(&json!({
            "name": name,
            "target_id": target_id,
            "schedule_type": "INTERVAL",
            "interval_seconds": 60,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

fn record_run(
    pool: &Pool,
    schedule_id: ScheduleId,
    status: RunStatus,
    latency_ms: f64,
    error_type: Option<&str>,
) -> i64 {
    let runs = RunStore::new(pool.clone());
    let id = runs
        .begin(&NewRun {
            schedule_id,
            started_at: Utc::now(),
            request_url: "http://localhost:9/".into(),
            request_method: HttpMethod::Get,
        })
        .unwrap();
    runs.finalize(
        id,
        &RunOutcome {
            status,
            finished_at: Utc::now(),
            latency_ms,
            http_status: match status {
                RunStatus::Success => Some(200),
                _ => Some(500),
            },
            response_size_bytes: None,
            response_snippet: None,
            error_type: error_type.map(Into::into),
            error_message: None,
        },
    )
    .unwrap();
    id
}

#[tokio::test]
async fn health_reports_version_and_timers() {
    let (_dir, _pool, base) = spawn_api().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/api/v1/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["live_timers"], 0);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn target_crud_roundtrip() {
    let (_dir, _pool, base) = spawn_api().await;
    let api = format!("{base}/api/v1");
    let client = reqwest::Client::new();

    let target = create_target(&client, &api, "checkout").await;
    let id = target["id"].as_i64().unwrap();
    assert_eq!(target["name"], "checkout");
    assert_eq!(target["method"], "GET", "method defaults to GET");

    let listed: Vec<Value> = client
        .get(format!("{api}/targets"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let fetched = client
        .get(format!("{api}/targets/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), 200);

    let renamed: Value = client
        .put(format!("{api}/targets/{id}"))
        .json(&json!({ "name": "checkout-v2" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(renamed["name"], "checkout-v2");

    let deleted = client
        .delete(format!("{api}/targets/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let gone = client
        .get(format!("{api}/targets/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
    let body: Value = gone.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn target_validation_is_enforced() {
    let (_dir, _pool, base) = spawn_api().await;
    let api = format!("{base}/api/v1");
    let client = reqwest::Client::new();

    let empty_name = client
        .post(format!("{api}/targets"))
        .json(&json!({ "name": "", "url": "https://example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty_name.status(), 400);
    let body: Value = empty_name.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("1 and 255"));

    let bad_scheme = client
        .post(format!("{api}/targets"))
        .json(&json!({ "name": "bad", "url": "ftp://example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_scheme.status(), 400);

    create_target(&client, &api, "dup").await;
    let duplicate = client
        .post(format!("{api}/targets"))
        .json(&json!({ "name": "dup", "url": "https://example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 400);
    let body: Value = duplicate.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("already taken"));
}

#[tokio::test]
async fn schedule_lifecycle_over_http() {
    let (_dir, _pool, base) = spawn_api().await;
    let api = format!("{base}/api/v1");
    let client = reqwest::Client::new();

    let target = create_target(&client, &api, "api").await;
    let schedule = create_schedule(&client, &api, "poll", target["id"].as_i64().unwrap()).await;
    let id = schedule["id"].as_i64().unwrap();
    assert_eq!(schedule["status"], "ACTIVE");
    assert_eq!(schedule["schedule_type"], "INTERVAL");
    assert_eq!(schedule["interval_seconds"], 60);

    // The created schedule holds a live timer.
    let health: Value = client
        .get(format!("{api}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["live_timers"], 1);

    let paused: Value = client
        .post(format!("{api}/schedules/{id}/pause"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(paused["status"], "PAUSED");

    let double_pause = client
        .post(format!("{api}/schedules/{id}/pause"))
        .send()
        .await
        .unwrap();
    assert_eq!(double_pause.status(), 400);
    let body: Value = double_pause.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid state"));

    let resumed: Value = client
        .post(format!("{api}/schedules/{id}/resume"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resumed["status"], "ACTIVE");

    let renamed: Value = client
        .put(format!("{api}/schedules/{id}"))
        .json(&json!({ "name": "poll-v2" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(renamed["name"], "poll-v2");

    let deleted = client
        .delete(format!("{api}/schedules/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let gone = client
        .get(format!("{api}/schedules/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn schedule_with_unknown_target_is_rejected() {
    let (_dir, _pool, base) = spawn_api().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/v1/schedules"))
        .json(&json!({
            "name": "orphan",
            "target_id": 9999,
            "schedule_type": "INTERVAL",
            "interval_seconds": 60,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("does not exist"));
}

#[tokio::test]
async fn window_schedules_carry_their_window_fields() {
    let (_dir, _pool, base) = spawn_api().await;
    let api = format!("{base}/api/v1");
    let client = reqwest::Client::new();

    let target = create_target(&client, &api, "api").await;
    let resp = client
        .post(format!("{api}/schedules"))
        .json(&json!({
            "name": "bounded",
            "target_id": target["id"].as_i64().unwrap(),
            "schedule_type": "WINDOW",
            "interval_seconds": 60,
            "duration_seconds": 3600,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let schedule: Value = resp.json().await.unwrap();
    assert_eq!(schedule["schedule_type"], "WINDOW");
    assert_eq!(schedule["duration_seconds"], 3600);
    assert!(schedule["window_started_at"].is_string());

    let active: Vec<Value> = client
        .get(format!("{api}/schedules?status=ACTIVE"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(active.len(), 1);

    let stopped: Vec<Value> = client
        .get(format!("{api}/schedules?status=STOPPED"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stopped.is_empty());
}

#[tokio::test]
async fn runs_listing_filters_and_detail() {
    let (_dir, pool, base) = spawn_api().await;
    let api = format!("{base}/api/v1");
    let client = reqwest::Client::new();

    let target = create_target(&client, &api, "api").await;
    let schedule = create_schedule(&client, &api, "poll", target["id"].as_i64().unwrap()).await;
    let schedule_id = schedule["id"].as_i64().unwrap();

    let success = record_run(&pool, schedule_id, RunStatus::Success, 42.0, None);
    let failure = record_run(&pool, schedule_id, RunStatus::Failed, 9.0, Some("http_5xx"));

    let all: Vec<Value> = client
        .get(format!("{api}/runs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0]["id"].as_i64().unwrap(), failure, "newest first");

    let successes: Vec<Value> = client
        .get(format!("{api}/runs?status=SUCCESS&schedule_id={schedule_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0]["id"].as_i64().unwrap(), success);

    let limited: Vec<Value> = client
        .get(format!("{api}/runs?limit=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    let future = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let none: Vec<Value> = client
        .get(format!("{api}/runs"))
        .query(&[("start_time", future)])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(none.is_empty());

    let detail: Value = client
        .get(format!("{api}/runs/{success}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["status"], "SUCCESS");
    assert_eq!(detail["attempts"].as_array().unwrap().len(), 1);
    assert_eq!(detail["attempts"][0]["attempt_number"], 1);

    let missing = client
        .get(format!("{api}/runs/999999"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn metrics_reflect_recorded_runs() {
    let (_dir, pool, base) = spawn_api().await;
    let api = format!("{base}/api/v1");
    let client = reqwest::Client::new();

    let target = create_target(&client, &api, "api").await;
    let schedule = create_schedule(&client, &api, "poll", target["id"].as_i64().unwrap()).await;
    let schedule_id = schedule["id"].as_i64().unwrap();
    record_run(&pool, schedule_id, RunStatus::Success, 100.0, None);
    record_run(&pool, schedule_id, RunStatus::Failed, 9000.0, Some("http_5xx"));

    let system: Value = client
        .get(format!("{api}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(system["total_targets"], 1);
    assert_eq!(system["total_schedules"], 1);
    assert_eq!(system["active_schedules"], 1);
    assert_eq!(system["total_runs"], 2);
    assert_eq!(system["runs_last_hour"], 2);
    assert_eq!(system["success_rate"].as_f64().unwrap(), 50.0);
    assert_eq!(
        system["avg_latency_ms"].as_f64().unwrap(),
        100.0,
        "failed latencies never count"
    );

    let per_schedule: Vec<Value> = client
        .get(format!("{api}/metrics/schedules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(per_schedule.len(), 1);
    let row = &per_schedule[0];
    assert_eq!(row["schedule_name"], "poll");
    assert_eq!(row["total_runs"], 2);
    assert_eq!(row["successful_runs"], 1);
    assert_eq!(row["failed_runs"], 1);
    assert!(row["last_run_at"].is_string());
}

#[tokio::test]
async fn unknown_routes_fall_back_to_not_found() {
    let (_dir, _pool, base) = spawn_api().await;
    let client = reqwest::Client::new();

    let api_miss = client
        .get(format!("{base}/api/v1/nonsense"))
        .send()
        .await
        .unwrap();
    assert_eq!(api_miss.status(), 404);

    let root = client.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(root.status(), 404);
    assert_eq!(root.text().await.unwrap(), "not found");
}

#[tokio::test]
async fn deleting_a_target_tears_down_its_schedules() {
    let (_dir, _pool, base) = spawn_api().await;
    let api = format!("{base}/api/v1");
    let client = reqwest::Client::new();

    let target = create_target(&client, &api, "api").await;
    let target_id = target["id"].as_i64().unwrap();
    let schedule = create_schedule(&client, &api, "poll", target_id).await;
    let schedule_id = schedule["id"].as_i64().unwrap();

    let deleted = client
        .delete(format!("{api}/targets/{target_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let gone = client
        .get(format!("{api}/schedules/{schedule_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404, "schedules go with their target");

    let health: Value = client
        .get(format!("{api}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["live_timers"], 0, "their timers go too");
}
