use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use follow_notify::{LogMailer, SmtpConfig, SmtpMailer};
use market_data::QuoteClient;
use pipeline::{Pipeline, PipelineConfig};
use report_core::Mailer;
use report_ingest::CrawlerClient;
use report_store::SqlStore;
use tokio::signal::unix::SignalKind;
use tokio::time;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    tracing::info!("Starting report pipeline");

    let config = PipelineConfig::from_env()?;
    tracing::info!("  Run interval: {}s", config.run_interval_seconds);
    tracing::info!("  Backfill policy: {}", config.backfill_policy);
    tracing::info!(
        "  Backfill batch: {} (concurrency {})",
        config.backfill_batch_size,
        config.backfill_concurrency
    );
    if let Some(date) = config.run_date_override {
        tracing::info!("  Run date override: {date}");
    }

    let store = Arc::new(SqlStore::connect(&config.database_url).await?);
    store.init_tables().await?;
    tracing::info!("Store ready at {}", config.database_url);

    let market = Arc::new(QuoteClient::new(
        config.quote_base_url.clone(),
        config.quote_api_key.clone(),
    ));
    let source = Arc::new(CrawlerClient::new(config.crawler_base_url.clone()));

    let smtp = SmtpConfig::from_env();
    let mailer: Arc<dyn Mailer> = if smtp.is_configured() {
        tracing::info!("Email digests enabled (SMTP)");
        Arc::new(SmtpMailer::new(&smtp)?)
    } else {
        tracing::info!("SMTP not configured, digests will be logged only");
        Arc::new(LogMailer)
    };

    let pipeline = Arc::new(Pipeline::new(
        store,
        market,
        source,
        mailer,
        config.policy()?,
        config.backfill_concurrency,
    ));

    if config.run_once {
        let date = config
            .run_date_override
            .unwrap_or_else(|| chrono::Utc::now().date_naive());
        pipeline.run(date).await?;
        return Ok(());
    }

    let mut interval = time::interval(Duration::from_secs(config.run_interval_seconds));
    let mut sigint = tokio::signal::unix::signal(SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let date = config
                    .run_date_override
                    .unwrap_or_else(|| chrono::Utc::now().date_naive());
                if let Err(e) = pipeline.run(date).await {
                    tracing::error!("Pipeline run failed: {e}");
                }
            }
            _ = sigint.recv() => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                break;
            }
        }
    }

    Ok(())
}
