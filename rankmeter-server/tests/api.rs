use anyhow::Result;
use axum::http::StatusCode;
use rankmeter_core::types::{AccountId, ScheduleId};
use serde_json::{Value, json};

#[path = "support/mod.rs"]
mod support;

use support::{balance, fund, test_server, wait_for_run};

#[tokio::test]
async fn health_reports_version() -> Result<()> {
    let server = test_server()?;
    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[tokio::test]
async fn purchases_are_idempotent_per_checkout() -> Result<()> {
    let server = test_server()?;
    let account = AccountId::new().to_string();
    let path = format!("/api/v1/accounts/{account}/credit-purchases");

    let first: Value = server
        .post(&path)
        .json(&json!({ "credits": 50, "checkout_id": "cs_123" }))
        .await
        .json();
    assert_eq!(first["status"], "success");
    assert_eq!(first["data"]["replayed"], false);

    let replay: Value = server
        .post(&path)
        .json(&json!({ "credits": 50, "checkout_id": "cs_123" }))
        .await
        .json();
    assert_eq!(replay["data"]["replayed"], true);
    assert_eq!(balance(&server, &account).await, 50);

    server
        .post(&format!("/api/v1/accounts/{account}/credit-grants"))
        .json(&json!({ "credits": 20, "period_key": "2026-10" }))
        .await
        .assert_status_ok();
    assert_eq!(balance(&server, &account).await, 70);

    let ledger: Value = server
        .get(&format!("/api/v1/accounts/{account}/ledger?limit=10"))
        .await
        .json();
    let entries = ledger["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["balance_after"], 70);
    Ok(())
}

#[tokio::test]
async fn non_positive_purchase_is_rejected() -> Result<()> {
    let server = test_server()?;
    let account = AccountId::new().to_string();
    let response = server
        .post(&format!("/api/v1/accounts/{account}/credit-purchases"))
        .json(&json!({ "credits": 0, "checkout_id": "cs_zero" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert!(body.get("data").is_none());
    Ok(())
}

#[tokio::test]
async fn run_settles_and_refunds_failed_items() -> Result<()> {
    let server = test_server()?;
    let account = AccountId::new().to_string();
    fund(&server, &account, 10).await;

    let response = server
        .post(&format!("/api/v1/accounts/{account}/runs"))
        .json(&json!({
            "check_kind": "rank_check",
            "subjects": ["alpha", "beta", "broken"],
        }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    let run_id = body["data"]["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(body["data"]["estimated_credits"], 3);
    assert_eq!(body["data"]["triggered_by"], "api");

    let run = wait_for_run(&server, &account, &run_id).await;
    assert_eq!(run["status"], "completed");
    assert_eq!(run["processed_items"], 3);
    assert_eq!(run["successful_items"], 2);
    assert_eq!(run["failed_items"], 1);
    assert_eq!(run["total_credits_used"], 2);
    assert_eq!(run["credits_refunded"], 1);
    assert_eq!(run["progress_percent"], 100.0);
    assert_eq!(run["items"].as_array().map(Vec::len), Some(3));
    assert_eq!(balance(&server, &account).await, 8);

    // Latest run is the default status target.
    let latest: Value = server
        .get(&format!("/api/v1/accounts/{account}/runs/status"))
        .await
        .json();
    assert_eq!(latest["data"]["run_id"], run_id.as_str());
    assert!(latest["data"].get("items").is_none_or(Value::is_null));

    let retry = server
        .post(&format!(
            "/api/v1/accounts/{account}/runs/{run_id}/retry-failed"
        ))
        .await;
    retry.assert_status(StatusCode::ACCEPTED);
    let retry: Value = retry.json();
    assert_eq!(retry["data"]["total_items"], 1);
    assert_eq!(retry["data"]["estimated_credits"], 1);
    Ok(())
}

#[tokio::test]
async fn unaffordable_run_is_payment_required() -> Result<()> {
    let server = test_server()?;
    let account = AccountId::new().to_string();
    fund(&server, &account, 2).await;

    let response = server
        .post(&format!("/api/v1/accounts/{account}/runs"))
        .json(&json!({
            "check_kind": "rank_check",
            "subjects": ["a", "b", "c"],
            "options": { "surfaces": ["desktop", "mobile"] },
        }))
        .await;
    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");

    server
        .get(&format!("/api/v1/accounts/{account}/runs/status"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    assert_eq!(balance(&server, &account).await, 2);
    Ok(())
}

#[tokio::test]
async fn unconfigured_check_kind_is_a_bad_request() -> Result<()> {
    let server = test_server()?;
    let account = AccountId::new().to_string();
    fund(&server, &account, 100).await;

    server
        .post(&format!("/api/v1/accounts/{account}/runs"))
        .json(&json!({ "check_kind": "backlink_audit", "subjects": ["example.com"] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post(&format!("/api/v1/accounts/{account}/runs"))
        .json(&json!({ "check_kind": "carrier_pigeon", "subjects": ["x"] }))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn active_batch_cannot_be_triggered_twice() -> Result<()> {
    let server = test_server()?;
    let account = AccountId::new().to_string();
    fund(&server, &account, 10).await;
    let request = json!({ "check_kind": "rank_check", "subjects": ["slow-a", "slow-b"] });

    let first: Value = server
        .post(&format!("/api/v1/accounts/{account}/runs"))
        .json(&request)
        .await
        .json();
    let run_id = first["data"]["id"].as_str().unwrap_or_default().to_string();

    server
        .post(&format!("/api/v1/accounts/{account}/runs"))
        .json(&request)
        .await
        .assert_status(StatusCode::CONFLICT);

    let run = wait_for_run(&server, &account, &run_id).await;
    assert_eq!(run["status"], "completed");
    assert_eq!(balance(&server, &account).await, 8);
    Ok(())
}

#[tokio::test]
async fn cancelling_a_running_batch_refunds_the_rest() -> Result<()> {
    let server = test_server()?;
    let account = AccountId::new().to_string();
    fund(&server, &account, 10).await;

    let created: Value = server
        .post(&format!("/api/v1/accounts/{account}/runs"))
        .json(&json!({
            "check_kind": "rank_check",
            "subjects": ["slow-1", "slow-2", "slow-3", "slow-4", "slow-5", "slow-6"],
        }))
        .await
        .json();
    let run_id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    server
        .post(&format!(
            "/api/v1/accounts/{account}/runs/{run_id}/cancel?reason=changed%20my%20mind"
        ))
        .await
        .assert_status_ok();

    let run = wait_for_run(&server, &account, &run_id).await;
    assert_eq!(run["status"], "failed");
    let used = run["total_credits_used"].as_i64().unwrap_or(-1);
    assert!(used < 6);
    assert_eq!(run["credits_refunded"].as_i64(), Some(6 - used));
    assert_eq!(balance(&server, &account).await, 10 - used);

    let other = AccountId::new().to_string();
    server
        .post(&format!("/api/v1/accounts/{other}/runs/{run_id}/cancel"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn schedules_can_be_created_updated_and_read() -> Result<()> {
    let server = test_server()?;
    let account = AccountId::new().to_string();

    let created = server
        .post(&format!("/api/v1/accounts/{account}/schedules"))
        .json(&json!({
            "check_kind": "rank_check",
            "frequency": "weekly",
            "day_of_week": 3,
            "hour_utc": 9,
            "subjects": [" alpha", "beta "],
        }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let created: Value = created.json();
    let schedule = &created["data"]["schedule"];
    let schedule_id = schedule["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(schedule["enabled"], true);
    assert!(schedule["next_scheduled_at"].is_string());
    // Recurrence fields sit at the top level, mirroring the request shape.
    assert_eq!(schedule["frequency"], "weekly");
    assert_eq!(schedule["day_of_week"], 3);
    assert!(schedule["day_of_month"].is_null());
    assert_eq!(schedule["hour_utc"], 9);
    assert!(schedule.get("recurrence").is_none());
    assert_eq!(created["data"]["subjects"], json!(["alpha", "beta"]));

    server
        .post(&format!("/api/v1/accounts/{account}/schedules"))
        .json(&json!({
            "check_kind": "rank_check",
            "frequency": "daily",
            "hour_utc": 9,
            "subjects": ["kw", "kw", " "],
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .put(&format!("/api/v1/schedules/{schedule_id}"))
        .json(&json!({ "frequency": "daily", "hour_utc": 24 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .put(&format!("/api/v1/schedules/{schedule_id}"))
        .json(&json!({ "frequency": "daily", "day_of_week": 2, "hour_utc": 5 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let updated: Value = server
        .put(&format!("/api/v1/schedules/{schedule_id}"))
        .json(&json!({ "frequency": "monthly", "day_of_month": 28, "hour_utc": 23, "enabled": false }))
        .await
        .json();
    assert_eq!(updated["data"]["enabled"], false);
    assert_eq!(updated["data"]["frequency"], "monthly");
    assert_eq!(updated["data"]["day_of_month"], 28);

    let replaced: Value = server
        .put(&format!("/api/v1/schedules/{schedule_id}/subjects"))
        .json(&json!({ "subjects": ["gamma "] }))
        .await
        .json();
    assert_eq!(replaced["data"]["subjects"], json!(["gamma"]));
    server
        .put(&format!("/api/v1/schedules/{schedule_id}/subjects"))
        .json(&json!({ "subjects": [] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .put(&format!("/api/v1/schedules/{schedule_id}/subjects"))
        .json(&json!({ "subjects": ["delta", "delta"] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let fetched: Value = server
        .get(&format!("/api/v1/schedules/{schedule_id}"))
        .await
        .json();
    assert_eq!(fetched["data"]["subjects"], json!(["gamma"]));

    let trend: Value = server
        .get(&format!("/api/v1/schedules/{schedule_id}/trend"))
        .await
        .json();
    assert_eq!(trend["status"], "success");
    assert!(trend["data"].is_null());

    server
        .get(&format!("/api/v1/schedules/{}", ScheduleId::new()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn internal_triggers_report_their_work() -> Result<()> {
    let server = test_server()?;

    let dispatch: Value = server
        .post("/api/v1/internal/schedules/dispatch")
        .await
        .json();
    assert_eq!(dispatch["data"]["due"], 0);
    assert_eq!(dispatch["data"]["dispatched"], json!([]));

    let reap: Value = server.post("/api/v1/internal/runs/reap").await.json();
    assert_eq!(reap["data"]["examined"], 0);
    assert_eq!(reap["data"]["reaped"], json!([]));

    let resume: Value = server.post("/api/v1/internal/runs/resume").await.json();
    assert_eq!(resume["data"]["examined"], 0);
    assert_eq!(resume["data"]["resumed"], json!([]));
    Ok(())
}
