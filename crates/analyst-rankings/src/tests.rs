use std::sync::Arc;

use chrono::NaiveDate;
use report_core::{NewReport, RankMetric, ReportMetrics, ReportStore};
use report_store::SqlStore;

use crate::{Aggregator, DirtySet, RankingService};

async fn setup_store() -> Arc<SqlStore> {
    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");
    let store = SqlStore::new(pool);
    store.init_tables().await.expect("init tables");
    Arc::new(store)
}

async fn seed_analyst(store: &SqlStore, id: i64, name: &str) {
    sqlx::query("INSERT INTO analysts (id, name, firm) VALUES (?, ?, 'Acme')")
        .bind(id)
        .bind(name)
        .execute(store.pool())
        .await
        .unwrap();
}

/// Insert one report for the analyst and stamp it with the given metrics.
async fn seed_evaluated_report(
    store: &SqlStore,
    analyst_id: i64,
    pdf: &str,
    sectors: &[&str],
    return_rate: f64,
    achievement_score: f64,
) {
    let inserted = store
        .upsert_reports(&[NewReport {
            analyst_id: Some(analyst_id),
            firm_id: None,
            title: pdf.to_string(),
            summary: String::new(),
            pdf_url: pdf.to_string(),
            ticker: "005930".to_string(),
            stock_name: String::new(),
            investment_opinion: "BUY".to_string(),
            posted_at: NaiveDate::parse_from_str("2024-03-04", "%Y-%m-%d").unwrap(),
            ref_price: 100.0,
            target_price: 120.0,
            sectors: sectors.iter().map(|s| s.to_string()).collect(),
        }])
        .await
        .unwrap();
    store
        .update_report_metrics(
            inserted[0].id,
            ReportMetrics {
                return_rate,
                achievement_score,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn aggregate_is_mean_over_evaluated_reports() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;
    seed_evaluated_report(&store, 1, "http://r/1.pdf", &[], 0.10, 0.40).await;
    seed_evaluated_report(&store, 1, "http://r/2.pdf", &[], 0.20, 0.60).await;
    // A third report with no metrics yet must not drag the mean down.
    store
        .upsert_reports(&[NewReport {
            analyst_id: Some(1),
            firm_id: None,
            title: "pending".to_string(),
            summary: String::new(),
            pdf_url: "http://r/pending.pdf".to_string(),
            ticker: "005930".to_string(),
            stock_name: String::new(),
            investment_opinion: "BUY".to_string(),
            posted_at: NaiveDate::parse_from_str("2024-03-05", "%Y-%m-%d").unwrap(),
            ref_price: 100.0,
            target_price: 120.0,
            sectors: Vec::new(),
        }])
        .await
        .unwrap();

    let aggregator = Aggregator::new(store.clone() as Arc<dyn ReportStore>);
    let aggregate = aggregator.refresh_analyst(1).await.unwrap();
    assert!((aggregate.return_rate - 0.15).abs() < 1e-12);
    assert!((aggregate.achievement_rate - 0.50).abs() < 1e-12);
    assert_eq!(aggregate.evaluated_reports, 2);

    let analyst = store.get_analyst(1).await.unwrap().unwrap();
    assert!((analyst.return_rate - 0.15).abs() < 1e-12);
}

#[tokio::test]
async fn zero_evaluated_reports_yields_explicit_zero() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;

    let aggregator = Aggregator::new(store.clone() as Arc<dyn ReportStore>);
    let aggregate = aggregator.refresh_analyst(1).await.unwrap();
    assert_eq!(aggregate.return_rate, 0.0);
    assert_eq!(aggregate.achievement_rate, 0.0);
    assert_eq!(aggregate.evaluated_reports, 0);
}

#[tokio::test]
async fn ranking_sorted_descending_with_id_tiebreak() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;
    seed_analyst(&store, 2, "Lee").await;
    seed_analyst(&store, 3, "Park").await;
    seed_evaluated_report(&store, 1, "http://r/1.pdf", &["IT"], 0.10, 0.50).await;
    seed_evaluated_report(&store, 2, "http://r/2.pdf", &[], 0.30, 0.90).await;
    // Analyst 3 ties with analyst 1.
    seed_evaluated_report(&store, 3, "http://r/3.pdf", &[], 0.10, 0.50).await;

    let dirty = Arc::new(DirtySet::new());
    dirty.extend([1, 2, 3]);
    let service = RankingService::new(store.clone() as Arc<dyn ReportStore>, dirty);

    let ranked = service.rank_analysts(RankMetric::ReturnRate).await.unwrap();
    let order: Vec<i64> = ranked.iter().map(|e| e.analyst_id).collect();
    assert_eq!(order, vec![2, 1, 3]);
    assert_eq!(ranked[1].sector_names, vec!["IT".to_string()]);

    // Repeated calls return the same order for tied values.
    let again = service.rank_analysts(RankMetric::ReturnRate).await.unwrap();
    let order_again: Vec<i64> = again.iter().map(|e| e.analyst_id).collect();
    assert_eq!(order, order_again);
}

#[tokio::test]
async fn ranking_refreshes_dirty_aggregates_first() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;

    let dirty = Arc::new(DirtySet::new());
    let service = RankingService::new(store.clone() as Arc<dyn ReportStore>, dirty.clone());

    // Baseline: nothing evaluated, aggregate 0.
    let ranked = service.rank_analysts(RankMetric::ReturnRate).await.unwrap();
    assert_eq!(ranked[0].return_rate, 0.0);

    // A pipeline run evaluates a report and marks the analyst dirty. The
    // next ranking must reflect it even though the stored aggregate is
    // no longer null.
    seed_evaluated_report(&store, 1, "http://r/1.pdf", &[], 0.20, 1.00).await;
    dirty.mark(1);

    let ranked = service.rank_analysts(RankMetric::ReturnRate).await.unwrap();
    assert!((ranked[0].return_rate - 0.20).abs() < 1e-12);
    assert!(dirty.is_empty());
}

#[tokio::test]
async fn sector_ranking_reports_both_scopes() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;
    seed_analyst(&store, 2, "Lee").await;
    // Kim: one IT report at 0.30, one non-IT at -0.10 → overall 0.10,
    // IT-scoped 0.30.
    seed_evaluated_report(&store, 1, "http://r/1.pdf", &["IT"], 0.30, 0.80).await;
    seed_evaluated_report(&store, 1, "http://r/2.pdf", &["Autos"], -0.10, -0.20).await;
    // Lee has no IT report and must not appear.
    seed_evaluated_report(&store, 2, "http://r/3.pdf", &["Autos"], 0.50, 1.00).await;

    let dirty = Arc::new(DirtySet::new());
    dirty.extend([1, 2]);
    let service = RankingService::new(store.clone() as Arc<dyn ReportStore>, dirty);

    let ranked = service
        .rank_analysts_in_sector(RankMetric::ReturnRate, "IT")
        .await
        .unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].analyst_id, 1);
    assert!((ranked[0].overall_return_rate - 0.10).abs() < 1e-12);
    assert!((ranked[0].sector_return_rate - 0.30).abs() < 1e-12);
}

#[tokio::test]
async fn follower_ranking_descending_with_id_tiebreak() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;
    seed_analyst(&store, 2, "Lee").await;
    seed_analyst(&store, 3, "Park").await;
    for (user_id, email) in [(10, "a@x.com"), (11, "b@x.com"), (12, "c@x.com")] {
        sqlx::query("INSERT INTO users (id, email) VALUES (?, ?)")
            .bind(user_id)
            .bind(email)
            .execute(store.pool())
            .await
            .unwrap();
    }
    // Analyst 2 has two followers; 1 and 3 tie with one each.
    for (user_id, analyst_id) in [(10, 2), (11, 2), (10, 3), (11, 1)] {
        sqlx::query("INSERT INTO follows (user_id, analyst_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(analyst_id)
            .execute(store.pool())
            .await
            .unwrap();
    }

    let service = RankingService::new(
        store.clone() as Arc<dyn ReportStore>,
        Arc::new(DirtySet::new()),
    );
    let ranked = service.rank_by_followers().await.unwrap();
    let order: Vec<(i64, i64)> = ranked
        .iter()
        .map(|e| (e.analyst_id, e.follower_count))
        .collect();
    assert_eq!(order, vec![(2, 2), (1, 1), (3, 1)]);
}
