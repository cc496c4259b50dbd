//! Shared fixtures for core integration tests: scripted probers and an
//! in-memory service harness.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rankmeter_core::batch::{BatchRunCoordinator, CoordinatorConfig};
use rankmeter_core::credits::CreditLedger;
use rankmeter_core::database::Stores;
use rankmeter_core::database::infrastructure::memory::InMemoryStore;
use rankmeter_core::probe::{ProbeError, ProbeErrorKind, ProbeOutcome, ProbeRequest, Prober, ProberRegistry};
use rankmeter_core::schedule::{DispatcherConfig, ScheduleDispatcher, ScheduleService};
use rankmeter_core::summary::SummaryAggregator;
use rankmeter_core::types::{AccountId, CheckKind, Surface};
use tokio::sync::Mutex;

/// What the scripted prober answers for one subject.
#[derive(Clone, Debug)]
pub enum Script {
    Rank(u32),
    Absent,
    Fail(ProbeErrorKind),
    /// Sleep before answering with a rank.
    Slow(Duration, u32),
}

/// Deterministic prober: answers from a per-subject script, ranking
/// everything else at position 5. Counts calls and tracks concurrency.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<String, Script>>,
    per_surface: Mutex<HashMap<(String, Surface), Script>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn script(&self, subject: &str, script: Script) {
        self.scripts.lock().await.insert(subject.to_string(), script);
    }

    pub async fn script_surface(&self, subject: &str, surface: Surface, script: Script) {
        self.per_surface
            .lock()
            .await
            .insert((subject.to_string(), surface), script);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn check(&self, request: &ProbeRequest) -> Result<ProbeOutcome, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        let script = {
            let per_surface = self.per_surface.lock().await;
            match per_surface.get(&(request.subject.clone(), request.surface)) {
                Some(script) => script.clone(),
                None => self
                    .scripts
                    .lock()
                    .await
                    .get(&request.subject)
                    .cloned()
                    .unwrap_or(Script::Rank(5)),
            }
        };

        let answer = match script {
            Script::Rank(position) => Ok(ProbeOutcome::ranked(position)),
            Script::Absent => Ok(ProbeOutcome::absent()),
            Script::Fail(kind) => Err(ProbeError::new(kind, format!("scripted {kind}"))),
            Script::Slow(delay, position) => {
                tokio::time::sleep(delay).await;
                Ok(ProbeOutcome::ranked(position))
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

/// Services wired over one in-memory store.
pub struct Harness {
    pub store: InMemoryStore,
    pub stores: Stores,
    pub prober: Arc<ScriptedProber>,
    pub coordinator: Arc<BatchRunCoordinator>,
    pub aggregator: Arc<SummaryAggregator>,
    pub schedules: ScheduleService,
    pub dispatcher: ScheduleDispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        let store = InMemoryStore::new();
        let stores = Stores::in_memory(store.clone());
        let prober = ScriptedProber::new();

        let probers = ProberRegistry::new()
            .with(CheckKind::RankCheck, prober.clone())
            .with(CheckKind::AiVisibility, prober.clone())
            .with(CheckKind::BacklinkAudit, prober.clone());
        let schedules =
            ScheduleService::new(stores.schedules.clone()).with_max_items(config.max_items_per_run);
        let aggregator = Arc::new(SummaryAggregator::new(
            stores.runs.clone(),
            stores.summaries.clone(),
        ));
        let coordinator = Arc::new(
            BatchRunCoordinator::new(
                CreditLedger::new(stores.ledger.clone()),
                stores.runs.clone(),
                probers,
                config,
            )
            .with_summaries(aggregator.clone()),
        );
        let dispatcher = ScheduleDispatcher::new(
            stores.schedules.clone(),
            coordinator.clone(),
            DispatcherConfig::default(),
        );

        Self {
            store,
            stores,
            prober,
            coordinator,
            aggregator,
            schedules,
            dispatcher,
        }
    }

    /// Second coordinator over the same store, as another process would see it.
    pub fn sibling_coordinator(&self, config: CoordinatorConfig) -> Arc<BatchRunCoordinator> {
        let probers = ProberRegistry::new()
            .with(CheckKind::RankCheck, self.prober.clone())
            .with(CheckKind::AiVisibility, self.prober.clone())
            .with(CheckKind::BacklinkAudit, self.prober.clone());
        Arc::new(
            BatchRunCoordinator::new(
                CreditLedger::new(self.stores.ledger.clone()),
                self.stores.runs.clone(),
                probers,
                config,
            )
            .with_summaries(self.aggregator.clone()),
        )
    }

    pub fn ledger(&self) -> &CreditLedger {
        self.coordinator.ledger()
    }

    /// Fresh account holding `credits`.
    pub async fn funded_account(&self, credits: i64) -> AccountId {
        let account = AccountId::new();
        if credits > 0 {
            self.ledger()
                .purchase(account, credits, &format!("seed-{account}"))
                .await
                .expect("seed purchase");
        }
        account
    }
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        max_parallel_probes: 4,
        probe_timeout: Duration::from_secs(5),
        invocation_budget: Duration::from_secs(60),
        claim_slice: 4,
        ..CoordinatorConfig::default()
    }
}

pub fn subjects(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
