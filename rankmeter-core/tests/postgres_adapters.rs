//! Postgres adapter behaviour. Needs `DATABASE_URL`; run with
//! `--features postgres-tests`.

#![cfg(feature = "postgres-tests")]

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rankmeter_core::MeterError;
use rankmeter_core::batch::{BatchRunCoordinator, CreateRunRequest};
use rankmeter_core::credits::{CreditLedger, DebitRequest};
use rankmeter_core::database::Stores;
use rankmeter_core::database::ports::{
    BatchRunRepository, RunInsertOutcome, ScheduleRepository, SummaryRepository,
};
use rankmeter_core::probe::{ProbeErrorKind, ProberRegistry};
use rankmeter_core::schedule::ScheduleService;
use rankmeter_core::summary::summarize_items;
use rankmeter_core::types::{
    AccountId, BatchRun, BatchRunId, BatchRunItem, BatchRunStatus, CheckKind, CheckOptions,
    NewSchedule, ScheduleUpdate,
};
use sqlx::PgPool;

#[path = "support/mod.rs"]
mod support;

use support::{Script, ScriptedProber, subjects, test_config};

fn coordinator(stores: &Stores, prober: Arc<ScriptedProber>) -> BatchRunCoordinator {
    BatchRunCoordinator::new(
        CreditLedger::new(stores.ledger.clone()),
        stores.runs.clone(),
        ProberRegistry::new().with(CheckKind::RankCheck, prober),
        test_config(),
    )
}

fn pending_run(account_id: AccountId, run_key: &str, admission_key: &str) -> BatchRun {
    let now = Utc::now();
    BatchRun {
        id: BatchRunId::new(),
        account_id,
        schedule_id: None,
        run_key: run_key.to_string(),
        admission_key: admission_key.to_string(),
        check_kind: CheckKind::RankCheck,
        options: CheckOptions::default(),
        status: BatchRunStatus::Pending,
        total_items: 1,
        processed_items: 0,
        successful_items: 0,
        failed_items: 0,
        skipped_items: 0,
        estimated_credits: 1,
        credits_per_surface: 1,
        total_credits_used: 0,
        credits_refunded: 0,
        debit_key: format!("batch-run:{admission_key}"),
        error_message: None,
        triggered_by: "manual".to_string(),
        created_at: now,
        started_at: None,
        completed_at: None,
        updated_at: now,
    }
}

#[sqlx::test(migrator = "rankmeter_core::MIGRATOR")]
async fn concurrent_debits_serialize_per_account(pool: PgPool) -> Result<()> {
    let stores = Stores::postgres(pool);
    let ledger = Arc::new(CreditLedger::new(stores.ledger.clone()));
    let account = AccountId::new();
    ledger.purchase(account, 10, "pack-1").await?;

    let mut handles = Vec::new();
    for n in 0..8 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .debit(account, 3, DebitRequest::new(format!("debit-{n}"), "rank_check"))
                .await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => accepted += 1,
            Err(MeterError::InsufficientCredits { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(accepted, 3);
    assert_eq!(ledger.get_balance(account).await?, 1);

    let replay = ledger
        .debit(account, 3, DebitRequest::new("debit-0", "rank_check"))
        .await;
    match replay {
        Ok(receipt) => assert!(receipt.replayed),
        Err(MeterError::InsufficientCredits { available, .. }) => assert_eq!(available, 1),
        Err(other) => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[sqlx::test(migrator = "rankmeter_core::MIGRATOR")]
async fn refund_is_written_once(pool: PgPool) -> Result<()> {
    let stores = Stores::postgres(pool);
    let ledger = CreditLedger::new(stores.ledger.clone());
    let account = AccountId::new();
    ledger.purchase(account, 10, "pack-1").await?;
    ledger
        .debit(account, 6, DebitRequest::new("batch-run:r1", "rank_check"))
        .await?;

    let first = ledger.refund(account, 2, "batch-run:r1").await?.expect("refund");
    let second = ledger.refund(account, 2, "batch-run:r1").await?.expect("replay");
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(ledger.get_balance(account).await?, 6);
    assert_eq!(ledger.history(account, 10).await?.len(), 3);
    Ok(())
}

#[sqlx::test(migrator = "rankmeter_core::MIGRATOR")]
async fn batch_run_settles_against_postgres(pool: PgPool) -> Result<()> {
    let stores = Stores::postgres(pool);
    let prober = ScriptedProber::new();
    prober.script("gamma", Script::Fail(ProbeErrorKind::Upstream)).await;
    let coordinator = coordinator(&stores, prober);
    let account = AccountId::new();
    coordinator.ledger().purchase(account, 10, "pack-1").await?;

    let run = coordinator
        .create_run(CreateRunRequest::new(
            account,
            CheckKind::RankCheck,
            subjects(&["alpha", "beta", "gamma"]),
        ))
        .await?;
    let again = coordinator
        .create_run(CreateRunRequest::new(
            account,
            CheckKind::RankCheck,
            subjects(&["gamma", "beta", "alpha"]),
        ))
        .await;
    assert!(matches!(again, Err(MeterError::RunAlreadyActive { run_id }) if run_id == run.id));

    let run = coordinator.run(run.id).await?.into_run();
    assert_eq!(run.status, BatchRunStatus::Completed);
    assert_eq!(run.successful_items, 2);
    assert_eq!(run.failed_items, 1);
    assert_eq!(run.credits_refunded, 1);
    assert_eq!(coordinator.ledger().get_balance(account).await?, 8);

    let status = coordinator.status(account, None, true).await?;
    let items = status.items.expect("items requested");
    let order: Vec<_> = items.iter().map(|item| item.subject_id.as_str()).collect();
    assert_eq!(order, vec!["alpha", "beta", "gamma"]);
    assert_eq!(items[0].best_position(), Some(5));
    Ok(())
}

#[sqlx::test(migrator = "rankmeter_core::MIGRATOR")]
async fn active_run_key_is_unique_per_account(pool: PgPool) -> Result<()> {
    let stores = Stores::postgres(pool);
    let account = AccountId::new();

    let first = pending_run(account, "batch:abc", "adm-1");
    let item = BatchRunItem::pending(first.id, "alpha".to_string(), 0, Utc::now());
    assert_eq!(
        stores.runs.insert_run(&first, &[item]).await?,
        RunInsertOutcome::Inserted
    );

    let second = pending_run(account, "batch:abc", "adm-2");
    assert_eq!(
        stores.runs.insert_run(&second, &[]).await?,
        RunInsertOutcome::ActiveRunExists(first.id)
    );

    let other_account = pending_run(AccountId::new(), "batch:abc", "adm-1");
    assert_eq!(
        stores.runs.insert_run(&other_account, &[]).await?,
        RunInsertOutcome::Inserted
    );

    let claimed = stores.runs.claim_pending_items(first.id, 10, Utc::now()).await?;
    assert_eq!(claimed.len(), 1);
    assert!(
        stores
            .runs
            .claim_pending_items(first.id, 10, Utc::now())
            .await?
            .is_empty()
    );
    Ok(())
}

#[sqlx::test(migrator = "rankmeter_core::MIGRATOR")]
async fn schedule_slot_claim_is_compare_and_set(pool: PgPool) -> Result<()> {
    let stores = Stores::postgres(pool);
    let service = ScheduleService::new(stores.schedules.clone());
    let created_at = Utc.with_ymd_and_hms(2026, 10, 12, 10, 0, 0).unwrap();
    let (schedule, _) = service
        .create(
            NewSchedule {
                account_id: AccountId::new(),
                check_kind: CheckKind::RankCheck,
                options: CheckOptions::default(),
                update: ScheduleUpdate {
                    frequency: "weekly".to_string(),
                    day_of_week: Some(3),
                    day_of_month: None,
                    hour_utc: 9,
                    enabled: None,
                },
            },
            &subjects(&["alpha", "beta"]),
            created_at,
        )
        .await?;
    let slot = schedule.next_scheduled_at.expect("next slot");
    assert_eq!(slot, Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap());
    assert_eq!(service.subjects(schedule.id).await?, subjects(&["alpha", "beta"]));

    let due = stores.schedules.due_schedules(slot, 10).await?;
    assert_eq!(due.len(), 1);

    let next = slot + Duration::days(7);
    assert!(stores.schedules.claim_slot(schedule.id, slot, next, slot).await?);
    assert!(!stores.schedules.claim_slot(schedule.id, slot, next, slot).await?);

    let claimed = service.get(schedule.id).await?;
    assert_eq!(claimed.next_scheduled_at, Some(next));
    assert_eq!(claimed.last_scheduled_run_at, Some(slot));

    // A config write from a pre-claim read keeps the claim.
    let mut stale = schedule.clone();
    stale.enabled = false;
    let stored = stores.schedules.update_schedule(&stale).await?;
    assert!(!stored.enabled);
    assert_eq!(stored.last_scheduled_run_at, Some(slot));
    Ok(())
}

#[sqlx::test(migrator = "rankmeter_core::MIGRATOR")]
async fn summaries_upsert_per_day(pool: PgPool) -> Result<()> {
    let stores = Stores::postgres(pool);
    let service = ScheduleService::new(stores.schedules.clone());
    let (schedule, _) = service
        .create(
            NewSchedule {
                account_id: AccountId::new(),
                check_kind: CheckKind::RankCheck,
                options: CheckOptions::default(),
                update: ScheduleUpdate {
                    frequency: "daily".to_string(),
                    hour_utc: 4,
                    ..ScheduleUpdate::default()
                },
            },
            &subjects(&["alpha"]),
            Utc::now(),
        )
        .await?;

    let first_day = NaiveDate::from_ymd_opt(2026, 10, 15).expect("date");
    let second_day = NaiveDate::from_ymd_opt(2026, 10, 16).expect("date");
    let mut summary = summarize_items(schedule.id, first_day, &[], Utc::now());
    summary.top3 = 2;
    stores.summaries.upsert_summary(&summary).await?;
    summary.top3 = 4;
    summary.average_position = Some(2.5);
    stores.summaries.upsert_summary(&summary).await?;
    stores
        .summaries
        .upsert_summary(&summarize_items(schedule.id, second_day, &[], Utc::now()))
        .await?;

    let latest = stores.summaries.latest_summaries(schedule.id, 10).await?;
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].day, second_day);
    assert_eq!(latest[1].top3, 4);
    assert_eq!(latest[1].average_position, Some(2.5));
    Ok(())
}
