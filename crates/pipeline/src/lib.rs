pub mod config;

pub use config::PipelineConfig;

use std::sync::Arc;

use analyst_rankings::{Aggregator, DirtySet};
use chrono::{NaiveDate, Utc};
use follow_notify::FollowerNotifier;
use metrics_engine::{BackfillPolicy, MetricsBackfill};
use report_core::{Mailer, MarketData, PipelineError, ReportSource, ReportStore};
use report_ingest::IngestStage;
use tokio::sync::Mutex;

/// What one scheduled run did. `skipped_overlap` means a previous run was
/// still in flight and this trigger did nothing.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub skipped_overlap: bool,
    pub metrics_computed: usize,
    pub metrics_skipped: usize,
    pub new_reports: usize,
    pub aggregates_refreshed: usize,
    pub notified: usize,
    pub notify_failed: usize,
}

/// Sequences the daily stages: metric backfill, ingestion, aggregate
/// refresh, follower notification.
///
/// All collaborators are injected at construction; the orchestrator owns no
/// global state. Runs are serialized through a run-lock so two triggers
/// never compute the same report's metrics concurrently; stage-internal
/// parallelism is bounded inside each stage.
pub struct Pipeline {
    backfill: MetricsBackfill,
    ingest: IngestStage,
    aggregator: Aggregator,
    notifier: FollowerNotifier,
    dirty: Arc<DirtySet>,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ReportStore>,
        market: Arc<dyn MarketData>,
        source: Arc<dyn ReportSource>,
        mailer: Arc<dyn Mailer>,
        policy: BackfillPolicy,
        backfill_concurrency: usize,
    ) -> Self {
        Self {
            backfill: MetricsBackfill::new(
                Arc::clone(&store),
                market,
                policy,
                backfill_concurrency,
            ),
            ingest: IngestStage::new(Arc::clone(&store), source),
            aggregator: Aggregator::new(Arc::clone(&store)),
            notifier: FollowerNotifier::new(store, mailer),
            dirty: Arc::new(DirtySet::new()),
            run_lock: Mutex::new(()),
        }
    }

    /// The dirty-analyst set shared with the ranking read path.
    pub fn dirty(&self) -> Arc<DirtySet> {
        Arc::clone(&self.dirty)
    }

    pub async fn run_today(&self) -> Result<RunSummary, PipelineError> {
        self.run(Utc::now().date_naive()).await
    }

    pub async fn run(&self, run_date: NaiveDate) -> Result<RunSummary, PipelineError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            tracing::warn!("Previous pipeline run still in progress, skipping this trigger");
            return Ok(RunSummary {
                skipped_overlap: true,
                ..RunSummary::default()
            });
        };

        tracing::info!("Pipeline run starting for {run_date}");
        let mut summary = RunSummary::default();

        // Stage 1: backfill metrics for reports still missing them.
        let backfill = self.backfill.run(run_date).await?;
        summary.metrics_computed = backfill.computed;
        summary.metrics_skipped = backfill.skipped;
        self.dirty.extend(backfill.dirty_analysts);

        // Stage 2: pull and commit today's reports. A crawler failure
        // aborts ingestion for this run only; backfilled metrics stay
        // committed and aggregation still proceeds.
        let new_reports = match self.ingest.run(run_date).await {
            Ok(reports) => reports,
            Err(e @ PipelineError::SourceFetch(_)) => {
                tracing::error!("Ingestion aborted for this run: {e}");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        summary.new_reports = new_reports.len();
        self.dirty
            .extend(new_reports.iter().filter_map(|r| r.analyst_id));

        // Stage 3: refresh aggregates for exactly the analysts whose
        // report set changed this run.
        let stale = self.dirty.drain();
        summary.aggregates_refreshed = self.aggregator.refresh_many(stale).await;

        // Stage 4: one digest per follower of an analyst that published.
        let notify = self.notifier.notify_followers(&new_reports).await?;
        summary.notified = notify.notified;
        summary.notify_failed = notify.failed;

        tracing::info!(
            "Pipeline run done: {} metrics computed ({} skipped), {} new reports, \
             {} aggregates refreshed, {} users notified ({} failures)",
            summary.metrics_computed,
            summary.metrics_skipped,
            summary.new_reports,
            summary.aggregates_refreshed,
            summary.notified,
            summary.notify_failed
        );
        Ok(summary)
    }
}
