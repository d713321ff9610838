use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use report_core::{
    FollowerRankEntry, PipelineError, RankEntry, RankMetric, ReportStore, SectorRankEntry,
};

use crate::{Aggregator, DirtySet};

/// Read path over analyst aggregates.
///
/// Every ranking call first drains the shared dirty set and refreshes those
/// aggregates, so a ranking never reflects a stale aggregate for an analyst
/// whose reports changed this run. Rankings are ordered descending by the
/// requested metric with ties broken by ascending analyst id, so repeated
/// calls over the same data return the same order.
pub struct RankingService {
    store: Arc<dyn ReportStore>,
    aggregator: Aggregator,
    dirty: Arc<DirtySet>,
}

impl RankingService {
    pub fn new(store: Arc<dyn ReportStore>, dirty: Arc<DirtySet>) -> Self {
        let aggregator = Aggregator::new(Arc::clone(&store));
        Self {
            store,
            aggregator,
            dirty,
        }
    }

    async fn flush_dirty(&self) {
        let stale = self.dirty.drain();
        if !stale.is_empty() {
            tracing::debug!("Refreshing {} stale aggregates before ranking", stale.len());
            self.aggregator.refresh_many(stale).await;
        }
    }

    /// Global ranking over all analysts by the chosen aggregate metric.
    pub async fn rank_analysts(
        &self,
        metric: RankMetric,
    ) -> Result<Vec<RankEntry>, PipelineError> {
        self.flush_dirty().await;

        let analysts = self.store.list_analysts().await?;
        let mut entries = Vec::with_capacity(analysts.len());
        for analyst in analysts {
            let sector_names = self.store.sector_names_by_analyst(analyst.id).await?;
            entries.push(RankEntry {
                analyst_id: analyst.id,
                name: analyst.name,
                firm: analyst.firm,
                return_rate: analyst.return_rate,
                achievement_rate: analyst.achievement_rate,
                sector_names,
            });
        }

        sort_ranked(&mut entries, |e| match metric {
            RankMetric::ReturnRate => e.return_rate,
            RankMetric::AchievementRate => e.achievement_rate,
        }, |e| e.analyst_id);
        Ok(entries)
    }

    /// Ranking restricted to analysts with at least one report tagged with
    /// the sector (exact name match). Each entry carries the analyst's
    /// global aggregate and the mean over only their matching reports; the
    /// ordering metric is the sector-scoped one.
    pub async fn rank_analysts_in_sector(
        &self,
        metric: RankMetric,
        sector: &str,
    ) -> Result<Vec<SectorRankEntry>, PipelineError> {
        self.flush_dirty().await;

        let reports = self.store.reports_in_sector(sector).await?;

        // analyst id → (sum return, sum achievement, evaluated count)
        let mut per_analyst: BTreeMap<i64, (f64, f64, usize)> = BTreeMap::new();
        for report in &reports {
            let Some(analyst_id) = report.analyst_id else {
                continue;
            };
            let slot = per_analyst.entry(analyst_id).or_default();
            if let (Some(rr), Some(score)) = (report.return_rate, report.achievement_score) {
                slot.0 += rr;
                slot.1 += score;
                slot.2 += 1;
            }
        }

        let mut entries = Vec::with_capacity(per_analyst.len());
        for (analyst_id, (sum_rr, sum_score, evaluated)) in per_analyst {
            let Some(analyst) = self.store.get_analyst(analyst_id).await? else {
                continue;
            };
            let (sector_return_rate, sector_achievement_rate) = if evaluated == 0 {
                (0.0, 0.0)
            } else {
                (sum_rr / evaluated as f64, sum_score / evaluated as f64)
            };
            entries.push(SectorRankEntry {
                analyst_id,
                name: analyst.name,
                firm: analyst.firm,
                sector: sector.to_string(),
                overall_return_rate: analyst.return_rate,
                overall_achievement_rate: analyst.achievement_rate,
                sector_return_rate,
                sector_achievement_rate,
            });
        }

        sort_ranked(&mut entries, |e| match metric {
            RankMetric::ReturnRate => e.sector_return_rate,
            RankMetric::AchievementRate => e.sector_achievement_rate,
        }, |e| e.analyst_id);
        Ok(entries)
    }

    /// Analysts ordered by follower count, descending.
    pub async fn rank_by_followers(&self) -> Result<Vec<FollowerRankEntry>, PipelineError> {
        let counts = self.store.follower_counts().await?;
        let mut entries = Vec::with_capacity(counts.len());
        for (analyst_id, follower_count) in counts {
            let Some(analyst) = self.store.get_analyst(analyst_id).await? else {
                continue;
            };
            entries.push(FollowerRankEntry {
                analyst_id,
                name: analyst.name,
                firm: analyst.firm,
                follower_count,
            });
        }

        entries.sort_by(|a, b| {
            b.follower_count
                .cmp(&a.follower_count)
                .then(a.analyst_id.cmp(&b.analyst_id))
        });
        Ok(entries)
    }
}

/// Descending by `value`, ties broken by ascending id.
fn sort_ranked<T>(
    entries: &mut [T],
    value: impl Fn(&T) -> f64,
    id: impl Fn(&T) -> i64,
) {
    entries.sort_by(|a, b| {
        value(b)
            .partial_cmp(&value(a))
            .unwrap_or(Ordering::Equal)
            .then(id(a).cmp(&id(b)))
    });
}
