use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    Analyst, Follow, NewReport, PipelineError, RawReport, Report, ReportMetrics, User,
};

/// Read/write access to report and analyst records.
///
/// Upsert is keyed by report identity (`pdf_url`); aggregate updates are
/// point writes. Implementations must tolerate concurrent calls from a
/// bounded worker pool within one pipeline stage.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Reports with `return_rate IS NULL`, ordered by `posted_at` ascending.
    async fn reports_needing_metrics(&self, limit: i64) -> Result<Vec<Report>, PipelineError>;

    /// Point write of one report's computed metrics.
    async fn update_report_metrics(
        &self,
        report_id: i64,
        metrics: ReportMetrics,
    ) -> Result<(), PipelineError>;

    /// Bulk upsert keyed by `pdf_url`. Returns only the rows newly inserted
    /// by this call; rows that already existed are excluded.
    async fn upsert_reports(&self, reports: &[NewReport]) -> Result<Vec<Report>, PipelineError>;

    async fn reports_by_analyst(&self, analyst_id: i64) -> Result<Vec<Report>, PipelineError>;

    async fn list_analysts(&self) -> Result<Vec<Analyst>, PipelineError>;

    async fn get_analyst(&self, analyst_id: i64) -> Result<Option<Analyst>, PipelineError>;

    async fn update_analyst_aggregate(
        &self,
        analyst_id: i64,
        return_rate: f64,
        achievement_rate: f64,
    ) -> Result<(), PipelineError>;

    /// Deduplicated sector names across the analyst's reports.
    async fn sector_names_by_analyst(
        &self,
        analyst_id: i64,
    ) -> Result<Vec<String>, PipelineError>;

    /// All reports tagged with a sector of exactly this name.
    async fn reports_in_sector(&self, sector: &str) -> Result<Vec<Report>, PipelineError>;

    async fn follows_by_analysts(
        &self,
        analyst_ids: &[i64],
    ) -> Result<Vec<Follow>, PipelineError>;

    async fn find_user(&self, user_id: i64) -> Result<Option<User>, PipelineError>;

    /// (analyst_id, follower count) over the follow relation.
    async fn follower_counts(&self) -> Result<Vec<(i64, i64)>, PipelineError>;
}

/// Traded-price lookup for metric evaluation.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Closing price for the ticker on the given date.
    /// `MarketDataUnavailable` when the source has no price for that day.
    async fn price_on(&self, ticker: &str, date: NaiveDate) -> Result<f64, PipelineError>;
}

/// External report source (the crawler service).
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn fetch_reports(&self, date: NaiveDate) -> Result<Vec<RawReport>, PipelineError>;
}

/// Outbound mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// One digest per user listing every followed analyst that published
    /// today.
    async fn send_new_report_digest(
        &self,
        user: &User,
        analysts: &[Analyst],
    ) -> Result<(), PipelineError>;
}
