use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use report_core::{MarketData, PipelineError, Report, ReportMetrics, ReportStore};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;


/// Derive both metrics for one report from its prices.
///
/// `return_rate` is the realized move from the reference price to the
/// evaluation-date price. `achievement_score` is the fraction of the
/// forecast move (reference → target) realized by the evaluation date; it
/// is deliberately unclamped, so over-achievement reads as > 1.0 and a move
/// against the forecast as negative.
pub fn compute_metrics(
    ref_price: f64,
    target_price: f64,
    eval_price: f64,
) -> Result<ReportMetrics, PipelineError> {
    if !ref_price.is_finite() || ref_price == 0.0 {
        return Err(PipelineError::InvalidMetricInput(format!(
            "reference price {ref_price} is unusable"
        )));
    }
    let forecast_move = target_price - ref_price;
    if !forecast_move.is_finite() || forecast_move == 0.0 {
        return Err(PipelineError::InvalidMetricInput(format!(
            "target price {target_price} equals reference price {ref_price}"
        )));
    }

    let realized = eval_price - ref_price;
    Ok(ReportMetrics {
        return_rate: realized / ref_price,
        achievement_score: realized / forecast_move,
    })
}

/// Which pending reports one backfill run picks up.
#[derive(Debug, Clone, Copy)]
pub enum BackfillPolicy {
    /// The whole pending queue, bounded per run and resumable across runs.
    FullQueue { batch_size: usize },
    /// Only reports sharing the earliest pending posted-date. Matches the
    /// legacy same-day batching behavior.
    EarliestCohort,
}

impl Default for BackfillPolicy {
    fn default() -> Self {
        BackfillPolicy::FullQueue { batch_size: 500 }
    }
}

/// What one backfill run did.
#[derive(Debug, Default)]
pub struct BackfillOutcome {
    pub computed: usize,
    pub skipped: usize,
    /// Analysts whose owned-report set changed and need an aggregate refresh.
    pub dirty_analysts: HashSet<i64>,
}

/// Recomputes metrics for every report still missing them.
///
/// Per-report work runs on a bounded worker pool; a failure (market data
/// unavailable, undefined math, store write) skips that report only and it
/// is retried on the next run.
pub struct MetricsBackfill {
    store: Arc<dyn ReportStore>,
    market: Arc<dyn MarketData>,
    policy: BackfillPolicy,
    concurrency: usize,
}

const EARLIEST_COHORT_SCAN_LIMIT: i64 = 10_000;

impl MetricsBackfill {
    pub fn new(
        store: Arc<dyn ReportStore>,
        market: Arc<dyn MarketData>,
        policy: BackfillPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            market,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, eval_date: NaiveDate) -> Result<BackfillOutcome, PipelineError> {
        let limit = match self.policy {
            BackfillPolicy::FullQueue { batch_size } => batch_size as i64,
            BackfillPolicy::EarliestCohort => EARLIEST_COHORT_SCAN_LIMIT,
        };
        let mut pending = self.store.reports_needing_metrics(limit).await?;
        if let BackfillPolicy::EarliestCohort = self.policy {
            let earliest = pending.first().map(|r| r.posted_at);
            pending.retain(|r| Some(r.posted_at) == earliest);
        }

        let total = pending.len();
        if total == 0 {
            return Ok(BackfillOutcome::default());
        }
        tracing::info!("Backfilling metrics for {} pending reports", total);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        for report in pending {
            let store = Arc::clone(&self.store);
            let market = Arc::clone(&self.market);
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                match evaluate_report(&*store, &*market, &report, eval_date).await {
                    Ok(()) => Some(report.analyst_id),
                    Err(e) => {
                        tracing::warn!(
                            report_id = report.id,
                            ticker = %report.ticker,
                            "Skipping metric computation: {e}"
                        );
                        None
                    }
                }
            });
        }

        let mut outcome = BackfillOutcome::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(analyst_id)) => {
                    outcome.computed += 1;
                    if let Some(id) = analyst_id {
                        outcome.dirty_analysts.insert(id);
                    }
                }
                Ok(None) => outcome.skipped += 1,
                Err(e) => {
                    tracing::error!("Metric worker panicked: {e}");
                    outcome.skipped += 1;
                }
            }
        }
        tracing::info!(
            "Backfill done: {} computed, {} skipped",
            outcome.computed,
            outcome.skipped
        );
        Ok(outcome)
    }
}

async fn evaluate_report(
    store: &dyn ReportStore,
    market: &dyn MarketData,
    report: &Report,
    eval_date: NaiveDate,
) -> Result<(), PipelineError> {
    let eval_price = market.price_on(&report.ticker, eval_date).await?;
    let metrics = compute_metrics(report.ref_price, report.target_price, eval_price)?;
    store.update_report_metrics(report.id, metrics).await
}
