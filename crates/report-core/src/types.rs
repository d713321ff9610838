use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A published research report with a price forecast.
///
/// `return_rate` and `achievement_score` are `None` until the metrics
/// engine has evaluated the report against market data; once set they are a
/// snapshot as of that evaluation, not a live value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub analyst_id: Option<i64>,
    pub firm_id: Option<i64>,
    pub title: String,
    pub summary: String,
    pub pdf_url: String,
    pub ticker: String,
    pub stock_name: String,
    pub investment_opinion: String,
    pub posted_at: NaiveDate,
    pub ref_price: f64,
    pub target_price: f64,
    pub return_rate: Option<f64>,
    pub achievement_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A report as committed by ingestion, before the store assigns identity.
/// `pdf_url` is the natural key used for upsert dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub analyst_id: Option<i64>,
    pub firm_id: Option<i64>,
    pub title: String,
    pub summary: String,
    pub pdf_url: String,
    pub ticker: String,
    pub stock_name: String,
    pub investment_opinion: String,
    pub posted_at: NaiveDate,
    pub ref_price: f64,
    pub target_price: f64,
    /// Sector names tagged on the report by the crawler.
    pub sectors: Vec<String>,
}

/// Raw report shape as returned by the crawler service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReport {
    pub analyst_id: Option<i64>,
    pub firm_id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub pdf_url: String,
    pub ticker: String,
    #[serde(default)]
    pub stock_name: String,
    #[serde(default)]
    pub investment_opinion: String,
    pub posted_at: NaiveDate,
    pub ref_price: f64,
    pub target_price: f64,
    #[serde(default)]
    pub sectors: Vec<String>,
}

/// Per-analyst record. The two rate fields are aggregates maintained by the
/// aggregator: arithmetic mean over the analyst's evaluated reports, or an
/// explicit `0.0` when no report has been evaluated yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analyst {
    pub id: i64,
    pub name: String,
    pub firm: String,
    pub return_rate: f64,
    pub achievement_rate: f64,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Firm {
    pub id: i64,
    pub name: String,
}

/// Identity sufficient for notification delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub nickname: Option<String>,
}

/// Subscription from a user to an analyst. One row per (user, analyst) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Follow {
    pub user_id: i64,
    pub analyst_id: i64,
}

/// Result of evaluating one report against market data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub return_rate: f64,
    pub achievement_score: f64,
}

/// Which aggregate a ranking is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankMetric {
    ReturnRate,
    AchievementRate,
}

impl RankMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankMetric::ReturnRate => "return-rate",
            RankMetric::AchievementRate => "achievement-rate",
        }
    }
}

impl std::str::FromStr for RankMetric {
    type Err = crate::PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "return-rate" | "returnRate" => Ok(RankMetric::ReturnRate),
            "achievement-rate" | "achievementRate" => Ok(RankMetric::AchievementRate),
            other => Err(crate::PipelineError::Config(format!(
                "unknown rank metric: {other}"
            ))),
        }
    }
}

/// One row of the global analyst ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankEntry {
    pub analyst_id: i64,
    pub name: String,
    pub firm: String,
    pub return_rate: f64,
    pub achievement_rate: f64,
    /// Deduplicated sector names across the analyst's reports.
    pub sector_names: Vec<String>,
}

/// One row of a sector-filtered ranking. Carries both the analyst's global
/// aggregate and the mean over only their reports tagged with the sector,
/// so consumers can tell the two apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorRankEntry {
    pub analyst_id: i64,
    pub name: String,
    pub firm: String,
    pub sector: String,
    pub overall_return_rate: f64,
    pub overall_achievement_rate: f64,
    pub sector_return_rate: f64,
    pub sector_achievement_rate: f64,
}

/// One row of the follower-count ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerRankEntry {
    pub analyst_id: i64,
    pub name: String,
    pub firm: String,
    pub follower_count: i64,
}
