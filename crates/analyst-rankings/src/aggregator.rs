use std::sync::Arc;

use report_core::{PipelineError, ReportStore};

/// Per-analyst summary written back to the analyst record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalystAggregate {
    pub analyst_id: i64,
    pub return_rate: f64,
    pub achievement_rate: f64,
    pub evaluated_reports: usize,
}

/// Recomputes per-analyst aggregates from the analyst's current report set.
/// Safe to call repeatedly; every call derives from scratch.
pub struct Aggregator {
    store: Arc<dyn ReportStore>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    /// Mean return rate and achievement score over the analyst's evaluated
    /// reports. Zero evaluated reports writes an explicit 0, not null:
    /// callers rank unevaluated analysts as flat performers.
    pub async fn refresh_analyst(
        &self,
        analyst_id: i64,
    ) -> Result<AnalystAggregate, PipelineError> {
        let reports = self.store.reports_by_analyst(analyst_id).await?;
        let evaluated: Vec<(f64, f64)> = reports
            .iter()
            .filter_map(|r| match (r.return_rate, r.achievement_score) {
                (Some(rr), Some(score)) => Some((rr, score)),
                _ => None,
            })
            .collect();

        let (return_rate, achievement_rate) = if evaluated.is_empty() {
            (0.0, 0.0)
        } else {
            let n = evaluated.len() as f64;
            (
                evaluated.iter().map(|(rr, _)| rr).sum::<f64>() / n,
                evaluated.iter().map(|(_, s)| s).sum::<f64>() / n,
            )
        };

        self.store
            .update_analyst_aggregate(analyst_id, return_rate, achievement_rate)
            .await?;

        Ok(AnalystAggregate {
            analyst_id,
            return_rate,
            achievement_rate,
            evaluated_reports: evaluated.len(),
        })
    }

    /// Refresh a set of analysts, isolating per-analyst failures.
    /// Returns how many refreshes succeeded.
    pub async fn refresh_many(&self, analyst_ids: impl IntoIterator<Item = i64>) -> usize {
        let mut refreshed = 0;
        for analyst_id in analyst_ids {
            match self.refresh_analyst(analyst_id).await {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    tracing::warn!(analyst_id, "Aggregate refresh failed: {e}");
                }
            }
        }
        refreshed
    }
}
