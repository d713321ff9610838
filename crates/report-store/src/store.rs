use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use report_core::{
    Analyst, Follow, NewReport, PipelineError, Report, ReportMetrics, ReportStore, User,
};

/// sqlx-backed report store. Works against SQLite and Postgres through
/// `AnyPool`; dates are stored as TEXT (`YYYY-MM-DD` for market dates,
/// RFC 3339 for timestamps).
pub struct SqlStore {
    pool: sqlx::AnyPool,
}

fn store_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Store(e.to_string())
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: i64,
    analyst_id: Option<i64>,
    firm_id: Option<i64>,
    title: String,
    summary: String,
    pdf_url: String,
    ticker: String,
    stock_name: String,
    investment_opinion: String,
    posted_at: String,
    ref_price: f64,
    target_price: f64,
    return_rate: Option<f64>,
    achievement_score: Option<f64>,
    created_at: String,
    updated_at: String,
}

impl ReportRow {
    fn into_report(self) -> Result<Report, PipelineError> {
        let posted_at = NaiveDate::parse_from_str(&self.posted_at, "%Y-%m-%d")
            .map_err(|e| store_err(format!("bad posted_at {:?}: {e}", self.posted_at)))?;
        let created_at = parse_timestamp(&self.created_at)?;
        let updated_at = parse_timestamp(&self.updated_at)?;
        Ok(Report {
            id: self.id,
            analyst_id: self.analyst_id,
            firm_id: self.firm_id,
            title: self.title,
            summary: self.summary,
            pdf_url: self.pdf_url,
            ticker: self.ticker,
            stock_name: self.stock_name,
            investment_opinion: self.investment_opinion,
            posted_at,
            ref_price: self.ref_price,
            target_price: self.target_price,
            return_rate: self.return_rate,
            achievement_score: self.achievement_score,
            created_at,
            updated_at,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, PipelineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| store_err(format!("bad timestamp {s:?}: {e}")))
}

#[derive(sqlx::FromRow)]
struct AnalystRow {
    id: i64,
    name: String,
    firm: String,
    return_rate: f64,
    achievement_rate: f64,
    email: Option<String>,
    photo_url: Option<String>,
}

impl From<AnalystRow> for Analyst {
    fn from(row: AnalystRow) -> Self {
        Analyst {
            id: row.id,
            name: row.name,
            firm: row.firm,
            return_rate: row.return_rate,
            achievement_rate: row.achievement_rate,
            email: row.email,
            photo_url: row.photo_url,
        }
    }
}

impl SqlStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, PipelineError> {
        sqlx::any::install_default_drivers();
        let pool = sqlx::AnyPool::connect(database_url)
            .await
            .map_err(store_err)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &sqlx::AnyPool {
        &self.pool
    }

    /// Create tables if they don't exist. Production Postgres deployments
    /// manage schema separately; this covers SQLite and fresh installs.
    pub async fn init_tables(&self) -> Result<(), PipelineError> {
        let ddl = [
            "CREATE TABLE IF NOT EXISTS firms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS analysts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                firm TEXT NOT NULL DEFAULT '',
                return_rate REAL NOT NULL DEFAULT 0,
                achievement_rate REAL NOT NULL DEFAULT 0,
                email TEXT,
                photo_url TEXT
            )",
            "CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analyst_id INTEGER REFERENCES analysts(id) ON DELETE CASCADE,
                firm_id INTEGER REFERENCES firms(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                pdf_url TEXT NOT NULL UNIQUE,
                ticker TEXT NOT NULL,
                stock_name TEXT NOT NULL DEFAULT '',
                investment_opinion TEXT NOT NULL DEFAULT '',
                posted_at TEXT NOT NULL,
                ref_price REAL NOT NULL,
                target_price REAL NOT NULL,
                return_rate REAL,
                achievement_score REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                nickname TEXT
            )",
            "CREATE TABLE IF NOT EXISTS follows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                analyst_id INTEGER NOT NULL REFERENCES analysts(id) ON DELETE CASCADE,
                UNIQUE(user_id, analyst_id)
            )",
            "CREATE TABLE IF NOT EXISTS sectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )",
            "CREATE TABLE IF NOT EXISTS report_sectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                sector_id INTEGER NOT NULL REFERENCES sectors(id) ON DELETE CASCADE,
                UNIQUE(report_id, sector_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_reports_pending
                ON reports(posted_at) WHERE return_rate IS NULL",
            "CREATE INDEX IF NOT EXISTS idx_reports_analyst ON reports(analyst_id)",
            "CREATE INDEX IF NOT EXISTS idx_follows_analyst ON follows(analyst_id)",
        ];
        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    /// Insert the sector name if missing and return its id.
    async fn sector_id(&self, name: &str) -> Result<i64, PipelineError> {
        sqlx::query("INSERT INTO sectors (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        let (id,): (i64,) = sqlx::query_as("SELECT id FROM sectors WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(id)
    }

    async fn tag_report_sectors(
        &self,
        report_id: i64,
        sectors: &[String],
    ) -> Result<(), PipelineError> {
        for name in sectors {
            let sector_id = self.sector_id(name).await?;
            sqlx::query(
                "INSERT INTO report_sectors (report_id, sector_id) VALUES (?, ?)
                 ON CONFLICT(report_id, sector_id) DO NOTHING",
            )
            .bind(report_id)
            .bind(sector_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ReportStore for SqlStore {
    async fn reports_needing_metrics(&self, limit: i64) -> Result<Vec<Report>, PipelineError> {
        let rows: Vec<ReportRow> = sqlx::query_as(
            "SELECT * FROM reports WHERE return_rate IS NULL ORDER BY posted_at ASC, id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(ReportRow::into_report).collect()
    }

    async fn update_report_metrics(
        &self,
        report_id: i64,
        metrics: ReportMetrics,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE reports SET return_rate = ?, achievement_score = ?, updated_at = ? WHERE id = ?",
        )
        .bind(metrics.return_rate)
        .bind(metrics.achievement_score)
        .bind(Utc::now().to_rfc3339())
        .bind(report_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn upsert_reports(&self, reports: &[NewReport]) -> Result<Vec<Report>, PipelineError> {
        let mut inserted = Vec::new();
        for report in reports {
            let now = Utc::now();
            let row: Option<(i64,)> = sqlx::query_as(
                "INSERT INTO reports (
                    analyst_id, firm_id, title, summary, pdf_url, ticker,
                    stock_name, investment_opinion, posted_at, ref_price,
                    target_price, created_at, updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(pdf_url) DO NOTHING
                 RETURNING id",
            )
            .bind(report.analyst_id)
            .bind(report.firm_id)
            .bind(&report.title)
            .bind(&report.summary)
            .bind(&report.pdf_url)
            .bind(&report.ticker)
            .bind(&report.stock_name)
            .bind(&report.investment_opinion)
            .bind(report.posted_at.format("%Y-%m-%d").to_string())
            .bind(report.ref_price)
            .bind(report.target_price)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

            let Some((id,)) = row else {
                // Already present from an earlier ingest run.
                continue;
            };
            self.tag_report_sectors(id, &report.sectors).await?;
            inserted.push(Report {
                id,
                analyst_id: report.analyst_id,
                firm_id: report.firm_id,
                title: report.title.clone(),
                summary: report.summary.clone(),
                pdf_url: report.pdf_url.clone(),
                ticker: report.ticker.clone(),
                stock_name: report.stock_name.clone(),
                investment_opinion: report.investment_opinion.clone(),
                posted_at: report.posted_at,
                ref_price: report.ref_price,
                target_price: report.target_price,
                return_rate: None,
                achievement_score: None,
                created_at: now,
                updated_at: now,
            });
        }
        Ok(inserted)
    }

    async fn reports_by_analyst(&self, analyst_id: i64) -> Result<Vec<Report>, PipelineError> {
        let rows: Vec<ReportRow> = sqlx::query_as(
            "SELECT * FROM reports WHERE analyst_id = ? ORDER BY posted_at ASC, id ASC",
        )
        .bind(analyst_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(ReportRow::into_report).collect()
    }

    async fn list_analysts(&self) -> Result<Vec<Analyst>, PipelineError> {
        let rows: Vec<AnalystRow> = sqlx::query_as("SELECT * FROM analysts ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(Analyst::from).collect())
    }

    async fn get_analyst(&self, analyst_id: i64) -> Result<Option<Analyst>, PipelineError> {
        let row: Option<AnalystRow> = sqlx::query_as("SELECT * FROM analysts WHERE id = ?")
            .bind(analyst_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(Analyst::from))
    }

    async fn update_analyst_aggregate(
        &self,
        analyst_id: i64,
        return_rate: f64,
        achievement_rate: f64,
    ) -> Result<(), PipelineError> {
        sqlx::query("UPDATE analysts SET return_rate = ?, achievement_rate = ? WHERE id = ?")
            .bind(return_rate)
            .bind(achievement_rate)
            .bind(analyst_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn sector_names_by_analyst(
        &self,
        analyst_id: i64,
    ) -> Result<Vec<String>, PipelineError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT s.name FROM sectors s
             JOIN report_sectors rs ON rs.sector_id = s.id
             JOIN reports r ON r.id = rs.report_id
             WHERE r.analyst_id = ?
             ORDER BY s.name ASC",
        )
        .bind(analyst_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn reports_in_sector(&self, sector: &str) -> Result<Vec<Report>, PipelineError> {
        let rows: Vec<ReportRow> = sqlx::query_as(
            "SELECT r.* FROM reports r
             JOIN report_sectors rs ON rs.report_id = r.id
             JOIN sectors s ON s.id = rs.sector_id
             WHERE s.name = ?
             ORDER BY r.id ASC",
        )
        .bind(sector)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter().map(ReportRow::into_report).collect()
    }

    async fn follows_by_analysts(
        &self,
        analyst_ids: &[i64],
    ) -> Result<Vec<Follow>, PipelineError> {
        if analyst_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; analyst_ids.len()].join(", ");
        let sql = format!(
            "SELECT user_id, analyst_id FROM follows WHERE analyst_id IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, (i64, i64)>(&sql);
        for id in analyst_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|(user_id, analyst_id)| Follow {
                user_id,
                analyst_id,
            })
            .collect())
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>, PipelineError> {
        let row: Option<(i64, String, Option<String>)> =
            sqlx::query_as("SELECT id, email, nickname FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(row.map(|(id, email, nickname)| User {
            id,
            email,
            nickname,
        }))
    }

    async fn follower_counts(&self) -> Result<Vec<(i64, i64)>, PipelineError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT analyst_id, COUNT(*) FROM follows GROUP BY analyst_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows)
    }
}
