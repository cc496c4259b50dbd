//! Test server over in-memory stores with a canned provider.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use rankmeter_core::batch::CoordinatorConfig;
use rankmeter_core::database::Stores;
use rankmeter_core::database::infrastructure::memory::InMemoryStore;
use rankmeter_core::probe::{
    ProbeError, ProbeErrorKind, ProbeOutcome, ProbeRequest, Prober, ProberRegistry,
};
use rankmeter_core::types::CheckKind;
use rankmeter_server::{AppState, ServiceSettings, create_app};
use serde_json::{Value, json};

/// Ranks every subject at 3, except `broken` (upstream error) and anything
/// starting with `slow` (answers after 400ms).
#[derive(Debug, Default)]
pub struct CannedProber;

#[async_trait]
impl Prober for CannedProber {
    async fn check(&self, request: &ProbeRequest) -> Result<ProbeOutcome, ProbeError> {
        if request.subject == "broken" {
            return Err(ProbeError::new(ProbeErrorKind::Upstream, "provider returned 500"));
        }
        if request.subject.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
        Ok(ProbeOutcome::ranked(3))
    }
}

pub fn test_server() -> anyhow::Result<TestServer> {
    let stores = Stores::in_memory(InMemoryStore::new());
    let probers = ProberRegistry::new().with(CheckKind::RankCheck, Arc::new(CannedProber));
    let settings = ServiceSettings {
        coordinator: CoordinatorConfig {
            max_parallel_probes: 2,
            probe_timeout: Duration::from_secs(5),
            ..CoordinatorConfig::default()
        },
        ..ServiceSettings::default()
    };
    let state = AppState::new(stores, probers, settings);
    Ok(TestServer::new(create_app(state))?)
}

pub async fn fund(server: &TestServer, account: &str, credits: i64) {
    server
        .post(&format!("/api/v1/accounts/{account}/credit-purchases"))
        .json(&json!({ "credits": credits, "checkout_id": format!("seed-{account}") }))
        .await
        .assert_status_ok();
}

pub async fn balance(server: &TestServer, account: &str) -> i64 {
    let body: Value = server
        .get(&format!("/api/v1/accounts/{account}/balance"))
        .await
        .json();
    body["data"]["balance"].as_i64().unwrap_or(i64::MIN)
}

/// Poll the status endpoint until the run is terminal.
pub async fn wait_for_run(server: &TestServer, account: &str, run_id: &str) -> Value {
    for _ in 0..200 {
        let body: Value = server
            .get(&format!(
                "/api/v1/accounts/{account}/runs/status?run_id={run_id}&include_items=true"
            ))
            .await
            .json();
        let status = body["data"]["status"].as_str().unwrap_or_default();
        if status == "completed" || status == "failed" {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {run_id} did not finish");
}
