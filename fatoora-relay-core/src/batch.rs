//! Batch resubmission and the background sweep.
use crate::config::{BatchConfig, SweepConfig};
use crate::store::Store;
use crate::submission::{SubmissionOutcome, Submitter};
use crate::Result;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tracing::{info, warn};

/// One invoice's line in a [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub invoice_number: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub success_count: usize,
    pub failed_count: usize,
    /// In request order.
    pub results: Vec<BatchItem>,
}

impl BatchReport {
    fn from_items(results: Vec<BatchItem>) -> Self {
        let success_count = results.iter().filter(|item| item.success).count();
        Self {
            success_count,
            failed_count: results.len() - success_count,
            results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "sweep", rename_all = "snake_case")]
pub enum SweepOutcome {
    OutsideWindow,
    Ran(BatchReport),
}

#[derive(Clone)]
pub struct BatchCoordinator {
    submitter: Submitter,
    store: Arc<dyn Store>,
    batch: BatchConfig,
    sweep: SweepConfig,
}

impl BatchCoordinator {
    pub fn new(
        submitter: Submitter,
        store: Arc<dyn Store>,
        batch: BatchConfig,
        sweep: SweepConfig,
    ) -> Self {
        Self {
            submitter,
            store,
            batch,
            sweep,
        }
    }

    /// Resubmits each stored invoice once, at most `max_parallel` at a time.
    ///
    /// Repeated numbers are submitted once. A failure of one invoice is
    /// recorded in the report and does not stop the others.
    pub async fn resubmit_invoices(
        &self,
        invoice_numbers: &[String],
        bypass_background_check: bool,
    ) -> BatchReport {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = invoice_numbers
            .iter()
            .filter(|number| seen.insert(number.as_str()))
            .collect();

        let mut items: Vec<(usize, BatchItem)> = stream::iter(unique.into_iter().enumerate())
            .map(|(index, number)| async move {
                let item = match self
                    .submitter
                    .submit(number, None, bypass_background_check)
                    .await
                {
                    Ok(outcome) => item_for(number, &outcome),
                    Err(err) => {
                        warn!(invoice = %number, error = %err, "resubmission failed");
                        BatchItem {
                            invoice_number: number.clone(),
                            success: false,
                            message: format!("Error: {err}"),
                        }
                    }
                };
                (index, item)
            })
            .buffer_unordered(self.batch.max_parallel.max(1))
            .collect()
            .await;
        items.sort_by_key(|(index, _)| *index);

        let report = BatchReport::from_items(items.into_iter().map(|(_, item)| item).collect());
        info!(
            success = report.success_count,
            failed = report.failed_count,
            "batch resubmission finished"
        );
        report
    }

    /// Resubmits recent `NOT SUBMITTED` and `Error` invoices when `now` falls
    /// inside the send window.
    pub async fn sweep_pending(&self, now: DateTime<FixedOffset>) -> Result<SweepOutcome> {
        if let Some(window) = self.sweep.window {
            if !window.contains(now.time()) {
                info!(now = %now.time(), "outside send window, sweep skipped");
                return Ok(SweepOutcome::OutsideWindow);
            }
        }

        let cutoff = now.with_timezone(&Utc) - Duration::hours(i64::from(self.sweep.lookback_hours));
        let pending: Vec<String> = self
            .store
            .list_invoices()
            .await?
            .into_iter()
            .filter(|record| record.status.is_pending() && record.created_at >= cutoff)
            .map(|record| record.invoice_number)
            .collect();

        info!(pending = pending.len(), "sweeping pending invoices");
        Ok(SweepOutcome::Ran(self.resubmit_invoices(&pending, true).await))
    }
}

fn item_for(invoice_number: &str, outcome: &SubmissionOutcome) -> BatchItem {
    BatchItem {
        invoice_number: invoice_number.to_string(),
        success: outcome.is_success(),
        message: outcome.message(),
    }
}
