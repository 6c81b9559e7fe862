mod common;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use common::{harness, source, Scripted};
use fatoora_relay_core::{
    batch::SweepOutcome,
    config::{BatchConfig, Config, SendWindow, SweepConfig},
    invoice::InvoiceSubType,
    status::SubmissionStatus,
    store::{InvoiceRecord, Store},
};

fn riyadh(hour: u32, minute: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(3 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 5, 2, hour, minute, 0)
        .unwrap()
}

async fn stored(store: &dyn Store, number: &str, created_at: DateTime<Utc>) {
    let record = InvoiceRecord::new(source(number, InvoiceSubType::Simplified), created_at);
    store.save_invoice(&record).await.expect("save invoice");
}

#[tokio::test]
async fn one_failure_does_not_stop_the_batch() {
    let h = harness(Config::default()).await;
    stored(h.store.as_ref(), "A", Utc::now()).await;
    stored(h.store.as_ref(), "B", Utc::now()).await;
    h.authority.script("A", Scripted::Network("timed out".into()));

    let report = h
        .relay
        .resubmit_invoices(&["A".to_string(), "B".to_string()], false)
        .await;

    assert_eq!(report.success_count, 1);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.results[0].invoice_number, "A");
    assert!(!report.results[0].success);
    assert!(report.results[0].message.starts_with("Error:"));
    assert_eq!(report.results[1].invoice_number, "B");
    assert_eq!(report.results[1].message, "REPORTED");
}

#[tokio::test]
async fn repeated_numbers_are_submitted_once() {
    let h = harness(Config::default()).await;
    stored(h.store.as_ref(), "A", Utc::now()).await;

    let numbers = ["A", "A", "A"].map(String::from);
    let report = h.relay.resubmit_invoices(&numbers, false).await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.success_count, 1);
    assert_eq!(h.authority.calls().len(), 1);
}

#[tokio::test]
async fn already_accepted_counts_as_success() {
    let h = harness(Config::default()).await;
    stored(h.store.as_ref(), "A", Utc::now()).await;
    h.relay.resubmit_invoices(&["A".to_string()], false).await;

    let report = h.relay.resubmit_invoices(&["A".to_string()], false).await;
    assert_eq!(report.success_count, 1);
    assert_eq!(report.results[0].message, "Already submitted");
    assert_eq!(h.authority.calls().len(), 1);
}

#[tokio::test]
async fn parallel_batch_keeps_chain_consistent() {
    let config = Config {
        batch: BatchConfig { max_parallel: 4 },
        ..Config::default()
    };
    let h = harness(config).await;
    let numbers: Vec<String> = (1..=6).map(|n| format!("INV-{n}")).collect();
    for number in &numbers {
        stored(h.store.as_ref(), number, Utc::now()).await;
    }

    let report = h.relay.resubmit_invoices(&numbers, false).await;
    assert_eq!(report.success_count, 6);
    let ordered: Vec<&str> = report
        .results
        .iter()
        .map(|item| item.invoice_number.as_str())
        .collect();
    assert_eq!(ordered, numbers.iter().map(String::as_str).collect::<Vec<_>>());

    let mut calls = h.authority.calls();
    calls.sort_by_key(|call| call.icv);
    assert_eq!(
        calls.iter().map(|call| call.icv).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5, 6]
    );
    for pair in calls.windows(2) {
        assert_eq!(pair[1].pih, pair[0].invoice_hash);
    }
}

#[tokio::test]
async fn sweep_outside_window_does_nothing() {
    let config = Config {
        sweep: SweepConfig {
            lookback_hours: 24,
            window: Some(SendWindow {
                start: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(5, 0, 0).unwrap(),
            }),
        },
        ..Config::default()
    };
    let h = harness(config).await;
    stored(h.store.as_ref(), "A", riyadh(0, 0).with_timezone(&Utc)).await;

    let outcome = h.relay.sweep_pending(riyadh(12, 0)).await.unwrap();
    assert_eq!(outcome, SweepOutcome::OutsideWindow);
    assert!(h.authority.calls().is_empty());
}

#[tokio::test]
async fn sweep_resubmits_recent_pending_invoices() {
    let config = Config {
        sweep: SweepConfig {
            lookback_hours: 24,
            window: Some(SendWindow {
                start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            }),
        },
        ..Config::default()
    };
    let h = harness(config).await;
    let now = riyadh(2, 30);
    let now_utc = now.with_timezone(&Utc);

    stored(h.store.as_ref(), "RECENT", now_utc - Duration::hours(3)).await;
    stored(h.store.as_ref(), "STALE", now_utc - Duration::hours(48)).await;
    let mut errored = InvoiceRecord::new(
        source("ERRORED", InvoiceSubType::Simplified),
        now_utc - Duration::hours(1),
    );
    errored.status = SubmissionStatus::error("timed out");
    h.store.save_invoice(&errored).await.unwrap();
    let mut failed = InvoiceRecord::new(
        source("FAILED", InvoiceSubType::Simplified),
        now_utc - Duration::hours(1),
    );
    failed.status = SubmissionStatus::Failed;
    h.store.save_invoice(&failed).await.unwrap();

    let SweepOutcome::Ran(report) = h.relay.sweep_pending(now).await.unwrap() else {
        panic!("window wraps past midnight and contains 02:30");
    };
    let mut swept: Vec<&str> = report
        .results
        .iter()
        .map(|item| item.invoice_number.as_str())
        .collect();
    swept.sort_unstable();
    assert_eq!(swept, vec!["ERRORED", "RECENT"]);
    assert_eq!(report.success_count, 2);

    let stale = h.relay.invoice_status("STALE").await.unwrap().unwrap();
    assert_eq!(stale.status, SubmissionStatus::NotSubmitted);
}

#[tokio::test]
async fn sweep_ignores_background_mode() {
    let config = Config {
        submission_mode: fatoora_relay_core::config::SubmissionMode::Background,
        ..Config::default()
    };
    let h = harness(config).await;
    stored(h.store.as_ref(), "A", Utc::now()).await;

    let outcome = h.relay.sweep_pending(Utc::now().fixed_offset()).await.unwrap();
    let SweepOutcome::Ran(report) = outcome else {
        panic!("no window configured");
    };
    assert_eq!(report.success_count, 1);
}
