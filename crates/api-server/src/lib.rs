mod routes;

pub use routes::analyst_routes;

use std::sync::Arc;
use std::time::Duration;

use analyst_rankings::{DirtySet, RankingService};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use follow_notify::{LogMailer, SmtpConfig, SmtpMailer};
use market_data::QuoteClient;
use pipeline::{Pipeline, PipelineConfig};
use report_core::{Mailer, ReportStore};
use report_ingest::CrawlerClient;
use report_store::SqlStore;
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Standard JSON envelope for all API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Converts any `anyhow::Error` bubbling out of a handler into a 500 with
/// the standard envelope.
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("Handler error: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::error(self.0.to_string())),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReportStore>,
    pub rankings: Arc<RankingService>,
}

pub fn build_router(state: AppState) -> Router {
    analyst_routes()
        .route("/health", axum::routing::get(|| async { "ok" }))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://research.db".to_string());
    let store = Arc::new(SqlStore::connect(&database_url).await?);
    store.init_tables().await?;
    let store: Arc<dyn ReportStore> = store;
    tracing::info!("Store ready at {database_url}");

    // When the crawler and quote services are configured, the scheduled
    // pipeline runs inside this process and shares its dirty-analyst set
    // with the ranking read path.
    let dirty = match PipelineConfig::from_env() {
        Ok(config) => {
            let market = Arc::new(QuoteClient::new(
                config.quote_base_url.clone(),
                config.quote_api_key.clone(),
            ));
            let source = Arc::new(CrawlerClient::new(config.crawler_base_url.clone()));
            let smtp = SmtpConfig::from_env();
            let mailer: Arc<dyn Mailer> = if smtp.is_configured() {
                Arc::new(SmtpMailer::new(&smtp)?)
            } else {
                tracing::info!("SMTP not configured, digests will be logged only");
                Arc::new(LogMailer)
            };

            let pipeline = Arc::new(Pipeline::new(
                Arc::clone(&store),
                market,
                source,
                mailer,
                config.policy()?,
                config.backfill_concurrency,
            ));
            let dirty = pipeline.dirty();
            tracing::info!(
                "Embedded pipeline scheduled every {}s",
                config.run_interval_seconds
            );
            tokio::spawn(run_scheduler(pipeline, config));
            dirty
        }
        Err(e) => {
            tracing::warn!("Pipeline disabled ({e}); serving rankings read-only");
            Arc::new(DirtySet::new())
        }
    };

    let rankings = Arc::new(RankingService::new(Arc::clone(&store), dirty));
    let app = build_router(AppState { store, rankings });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("API server listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_scheduler(pipeline: Arc<Pipeline>, config: PipelineConfig) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(config.run_interval_seconds));
    loop {
        interval.tick().await;
        let date = config
            .run_date_override
            .unwrap_or_else(|| chrono::Utc::now().date_naive());
        if let Err(e) = pipeline.run(date).await {
            tracing::error!("Pipeline run failed: {e}");
        }
    }
}
