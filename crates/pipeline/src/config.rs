use anyhow::{Context, Result};
use chrono::NaiveDate;
use metrics_engine::BackfillPolicy;
use std::env;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub crawler_base_url: String,
    pub quote_base_url: String,
    pub quote_api_key: Option<String>,

    /// Seconds between scheduled runs.
    pub run_interval_seconds: u64,
    /// Upper bound on pending reports processed per run.
    pub backfill_batch_size: usize,
    /// Worker-pool width for per-report metric computation.
    pub backfill_concurrency: usize,
    /// "full-queue" (default) or "earliest-cohort".
    pub backfill_policy: String,

    /// Optional fixed run date for replay/testing; normally runs use today.
    pub run_date_override: Option<NaiveDate>,
    /// Run once and exit instead of scheduling.
    pub run_once: bool,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let run_date_override = match env::var("RUN_DATE") {
            Ok(s) if !s.is_empty() => Some(
                NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .with_context(|| format!("RUN_DATE {s:?} is not YYYY-MM-DD"))?,
            ),
            _ => None,
        };

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://research.db".to_string()),
            crawler_base_url: env::var("CRAWLER_BASE_URL")
                .context("CRAWLER_BASE_URL must be set")?,
            quote_base_url: env::var("QUOTE_BASE_URL").context("QUOTE_BASE_URL must be set")?,
            quote_api_key: env::var("QUOTE_API_KEY").ok().filter(|s| !s.is_empty()),
            run_interval_seconds: env::var("RUN_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("RUN_INTERVAL_SECONDS must be an integer")?,
            backfill_batch_size: env::var("BACKFILL_BATCH_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("BACKFILL_BATCH_SIZE must be an integer")?,
            backfill_concurrency: env::var("BACKFILL_CONCURRENCY")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .context("BACKFILL_CONCURRENCY must be an integer")?,
            backfill_policy: env::var("BACKFILL_POLICY")
                .unwrap_or_else(|_| "full-queue".to_string()),
            run_date_override,
            run_once: env::var("RUN_ONCE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        };

        if config.run_interval_seconds == 0 {
            anyhow::bail!("RUN_INTERVAL_SECONDS must be positive");
        }
        if config.backfill_batch_size == 0 {
            anyhow::bail!("BACKFILL_BATCH_SIZE must be positive");
        }
        Ok(config)
    }

    pub fn policy(&self) -> Result<BackfillPolicy> {
        match self.backfill_policy.as_str() {
            "full-queue" => Ok(BackfillPolicy::FullQueue {
                batch_size: self.backfill_batch_size,
            }),
            "earliest-cohort" => Ok(BackfillPolicy::EarliestCohort),
            other => anyhow::bail!("unknown BACKFILL_POLICY {other:?}"),
        }
    }
}
