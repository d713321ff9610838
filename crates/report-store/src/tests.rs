use chrono::NaiveDate;
use report_core::{NewReport, ReportMetrics, ReportStore};

use crate::SqlStore;

async fn setup_store() -> SqlStore {
    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");
    let store = SqlStore::new(pool);
    store.init_tables().await.expect("init tables");
    store
}

async fn seed_analyst(store: &SqlStore, id: i64, name: &str) {
    sqlx::query("INSERT INTO analysts (id, name, firm) VALUES (?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind("Acme Securities")
        .execute(store.pool())
        .await
        .unwrap();
}

fn new_report(pdf_url: &str, analyst_id: i64, posted_at: &str, sectors: &[&str]) -> NewReport {
    NewReport {
        analyst_id: Some(analyst_id),
        firm_id: None,
        title: format!("Report {pdf_url}"),
        summary: "summary".to_string(),
        pdf_url: pdf_url.to_string(),
        ticker: "005930".to_string(),
        stock_name: "Samsung Electronics".to_string(),
        investment_opinion: "BUY".to_string(),
        posted_at: NaiveDate::parse_from_str(posted_at, "%Y-%m-%d").unwrap(),
        ref_price: 100.0,
        target_price: 120.0,
        sectors: sectors.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn upsert_is_idempotent_on_pdf_url() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;

    let batch = vec![
        new_report("http://r/1.pdf", 1, "2024-03-04", &["Semiconductors"]),
        new_report("http://r/2.pdf", 1, "2024-03-04", &[]),
    ];

    let first = store.upsert_reports(&batch).await.unwrap();
    assert_eq!(first.len(), 2);

    // Re-running ingestion mid-day must not duplicate rows and must report
    // nothing new.
    let second = store.upsert_reports(&batch).await.unwrap();
    assert!(second.is_empty());

    let pending = store.reports_needing_metrics(100).await.unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn pending_reports_ordered_by_posted_at() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;

    let batch = vec![
        new_report("http://r/later.pdf", 1, "2024-03-06", &[]),
        new_report("http://r/earlier.pdf", 1, "2024-03-04", &[]),
    ];
    store.upsert_reports(&batch).await.unwrap();

    let pending = store.reports_needing_metrics(100).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].pdf_url, "http://r/earlier.pdf");
    assert_eq!(pending[1].pdf_url, "http://r/later.pdf");
}

#[tokio::test]
async fn metric_update_removes_report_from_pending_set() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;

    let inserted = store
        .upsert_reports(&[new_report("http://r/1.pdf", 1, "2024-03-04", &[])])
        .await
        .unwrap();
    let id = inserted[0].id;

    store
        .update_report_metrics(
            id,
            ReportMetrics {
                return_rate: 0.10,
                achievement_score: 0.50,
            },
        )
        .await
        .unwrap();

    assert!(store.reports_needing_metrics(100).await.unwrap().is_empty());

    let reports = store.reports_by_analyst(1).await.unwrap();
    assert_eq!(reports[0].return_rate, Some(0.10));
    assert_eq!(reports[0].achievement_score, Some(0.50));
}

#[tokio::test]
async fn sector_names_deduplicated_across_reports() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;

    store
        .upsert_reports(&[
            new_report("http://r/1.pdf", 1, "2024-03-04", &["Semiconductors", "IT"]),
            new_report("http://r/2.pdf", 1, "2024-03-05", &["Semiconductors"]),
        ])
        .await
        .unwrap();

    let sectors = store.sector_names_by_analyst(1).await.unwrap();
    assert_eq!(sectors, vec!["IT".to_string(), "Semiconductors".to_string()]);

    let in_sector = store.reports_in_sector("Semiconductors").await.unwrap();
    assert_eq!(in_sector.len(), 2);
    let in_it = store.reports_in_sector("IT").await.unwrap();
    assert_eq!(in_it.len(), 1);
}

#[tokio::test]
async fn follows_filtered_and_counted_per_analyst() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;
    seed_analyst(&store, 2, "Lee").await;
    seed_analyst(&store, 3, "Park").await;

    for (user_id, email) in [(10, "a@example.com"), (11, "b@example.com")] {
        sqlx::query("INSERT INTO users (id, email) VALUES (?, ?)")
            .bind(user_id)
            .bind(email)
            .execute(store.pool())
            .await
            .unwrap();
    }
    for (user_id, analyst_id) in [(10, 1), (10, 2), (11, 1), (11, 3)] {
        sqlx::query("INSERT INTO follows (user_id, analyst_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(analyst_id)
            .execute(store.pool())
            .await
            .unwrap();
    }

    let follows = store.follows_by_analysts(&[1, 2]).await.unwrap();
    assert_eq!(follows.len(), 3);
    assert!(store.follows_by_analysts(&[]).await.unwrap().is_empty());

    let mut counts = store.follower_counts().await.unwrap();
    counts.sort();
    assert_eq!(counts, vec![(1, 2), (2, 1), (3, 1)]);

    let user = store.find_user(10).await.unwrap().unwrap();
    assert_eq!(user.email, "a@example.com");
    assert!(store.find_user(99).await.unwrap().is_none());
}

#[tokio::test]
async fn aggregate_write_is_a_point_update() {
    let store = setup_store().await;
    seed_analyst(&store, 1, "Kim").await;

    store.update_analyst_aggregate(1, 0.15, 0.60).await.unwrap();

    let analyst = store.get_analyst(1).await.unwrap().unwrap();
    assert_eq!(analyst.return_rate, 0.15);
    assert_eq!(analyst.achievement_rate, 0.60);
}
