mod source;
#[cfg(test)]
mod tests;

pub use source::CrawlerClient;

use std::sync::Arc;

use chrono::NaiveDate;
use report_core::{NewReport, PipelineError, RawReport, Report, ReportSource, ReportStore};

/// Longest summary kept on a report; matches the store's bounded column.
const MAX_SUMMARY_CHARS: usize = 10_000;

/// Pulls the day's reports from the crawler, normalizes them, and commits
/// them with an idempotent upsert. Returns exactly the reports newly
/// committed by this call; rows already present are excluded, so the
/// notifier downstream never re-announces a report.
pub struct IngestStage {
    store: Arc<dyn ReportStore>,
    source: Arc<dyn ReportSource>,
}

impl IngestStage {
    pub fn new(store: Arc<dyn ReportStore>, source: Arc<dyn ReportSource>) -> Self {
        Self { store, source }
    }

    pub async fn run(&self, date: NaiveDate) -> Result<Vec<Report>, PipelineError> {
        let raw = self.source.fetch_reports(date).await?;
        let fetched = raw.len();

        let reports: Vec<NewReport> = raw.into_iter().filter_map(normalize).collect();
        if reports.len() < fetched {
            tracing::warn!(
                "Dropped {} malformed reports from crawler batch of {}",
                fetched - reports.len(),
                fetched
            );
        }

        let inserted = self.store.upsert_reports(&reports).await?;
        tracing::info!(
            "Ingested {} reports for {} ({} new)",
            reports.len(),
            date,
            inserted.len()
        );
        Ok(inserted)
    }
}

/// Normalize a crawler row into the store shape. Rows without the fields
/// the pipeline depends on are dropped.
pub fn normalize(raw: RawReport) -> Option<NewReport> {
    let pdf_url = raw.pdf_url.trim().to_string();
    let ticker = raw.ticker.trim().to_string();
    let title = raw.title.trim().to_string();
    if pdf_url.is_empty() || ticker.is_empty() || title.is_empty() {
        return None;
    }

    let mut summary = raw.summary.trim().to_string();
    if summary.chars().count() > MAX_SUMMARY_CHARS {
        summary = summary.chars().take(MAX_SUMMARY_CHARS).collect();
    }

    let mut sectors: Vec<String> = raw
        .sectors
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    sectors.sort();
    sectors.dedup();

    Some(NewReport {
        analyst_id: raw.analyst_id,
        firm_id: raw.firm_id,
        title,
        summary,
        pdf_url,
        ticker,
        stock_name: raw.stock_name.trim().to_string(),
        investment_opinion: raw.investment_opinion.trim().to_string(),
        posted_at: raw.posted_at,
        ref_price: raw.ref_price,
        target_price: raw.target_price,
        sectors,
    })
}
