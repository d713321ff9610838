use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use report_core::{PipelineError, RawReport, ReportSource, ReportStore};
use report_store::SqlStore;

use crate::{normalize, IngestStage};

fn raw(pdf_url: &str, ticker: &str) -> RawReport {
    RawReport {
        analyst_id: Some(1),
        firm_id: None,
        title: "Target raised".to_string(),
        summary: "short summary".to_string(),
        pdf_url: pdf_url.to_string(),
        ticker: ticker.to_string(),
        stock_name: "Samsung Electronics".to_string(),
        investment_opinion: "BUY".to_string(),
        posted_at: NaiveDate::parse_from_str("2024-03-04", "%Y-%m-%d").unwrap(),
        ref_price: 100.0,
        target_price: 120.0,
        sectors: vec!["IT".to_string(), "IT".to_string(), " ".to_string()],
    }
}

struct FixedSource {
    rows: Vec<RawReport>,
}

#[async_trait]
impl ReportSource for FixedSource {
    async fn fetch_reports(&self, _date: NaiveDate) -> Result<Vec<RawReport>, PipelineError> {
        Ok(self.rows.clone())
    }
}

struct FailingSource;

#[async_trait]
impl ReportSource for FailingSource {
    async fn fetch_reports(&self, _date: NaiveDate) -> Result<Vec<RawReport>, PipelineError> {
        Err(PipelineError::SourceFetch("crawler down".to_string()))
    }
}

async fn setup_store() -> Arc<SqlStore> {
    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");
    let store = SqlStore::new(pool);
    store.init_tables().await.expect("init tables");
    sqlx::query("INSERT INTO analysts (id, name, firm) VALUES (1, 'Kim', 'Acme')")
        .execute(store.pool())
        .await
        .unwrap();
    Arc::new(store)
}

#[test]
fn normalize_trims_dedups_and_drops_incomplete_rows() {
    let row = normalize(raw("  http://r/1.pdf  ", "005930")).unwrap();
    assert_eq!(row.pdf_url, "http://r/1.pdf");
    assert_eq!(row.sectors, vec!["IT".to_string()]);

    let mut missing_url = raw("", "005930");
    missing_url.pdf_url = "   ".to_string();
    assert!(normalize(missing_url).is_none());

    let mut missing_ticker = raw("http://r/2.pdf", "");
    missing_ticker.ticker = String::new();
    assert!(normalize(missing_ticker).is_none());
}

#[test]
fn normalize_bounds_summary_length() {
    let mut row = raw("http://r/1.pdf", "005930");
    row.summary = "가".repeat(20_000);
    let normalized = normalize(row).unwrap();
    assert_eq!(normalized.summary.chars().count(), 10_000);
}

#[tokio::test]
async fn second_ingest_of_same_day_returns_nothing_new() {
    let store = setup_store().await;
    let source = Arc::new(FixedSource {
        rows: vec![raw("http://r/1.pdf", "005930"), raw("http://r/2.pdf", "000660")],
    });
    let stage = IngestStage::new(store.clone(), source);
    let date = NaiveDate::parse_from_str("2024-03-04", "%Y-%m-%d").unwrap();

    let first = stage.run(date).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|r| r.return_rate.is_none()));

    let second = stage.run(date).await.unwrap();
    assert!(second.is_empty());

    // No duplicate rows were created.
    let pending = store.reports_needing_metrics(100).await.unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn source_failure_surfaces_as_source_fetch() {
    let store = setup_store().await;
    let stage = IngestStage::new(store, Arc::new(FailingSource));
    let date = NaiveDate::parse_from_str("2024-03-04", "%Y-%m-%d").unwrap();

    let err = stage.run(date).await.unwrap_err();
    assert!(matches!(err, PipelineError::SourceFetch(_)));
}
