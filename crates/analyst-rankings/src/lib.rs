mod aggregator;
mod ranking;
#[cfg(test)]
mod tests;

pub use aggregator::{Aggregator, AnalystAggregate};
pub use ranking::RankingService;

use dashmap::DashSet;

/// Analysts whose owned-report set changed since their aggregate was last
/// refreshed. The pipeline marks ids here as it mutates reports; the
/// aggregation stage and the ranking read path drain it. Replaces the
/// legacy "recompute only while the aggregate is null" staleness proxy.
#[derive(Debug, Default)]
pub struct DirtySet {
    ids: DashSet<i64>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, analyst_id: i64) {
        self.ids.insert(analyst_id);
    }

    pub fn extend(&self, analyst_ids: impl IntoIterator<Item = i64>) {
        for id in analyst_ids {
            self.ids.insert(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Take the current contents, leaving ids marked concurrently in place
    /// for the next drain.
    pub fn drain(&self) -> Vec<i64> {
        let snapshot: Vec<i64> = self.ids.iter().map(|id| *id).collect();
        for id in &snapshot {
            self.ids.remove(id);
        }
        snapshot
    }
}
