//! Analyst ranking and lookup routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use report_core::{RankMetric, Report};
use serde::Deserialize;

use crate::{ApiResponse, AppError, AppState};

pub fn analyst_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analysts/earning-rate", get(earning_rate_rank))
        .route("/api/analysts/achievement-rate", get(achievement_rate_rank))
        .route("/api/analysts/follower-rank", get(follower_rank))
        .route("/api/analysts", get(sector_rank))
        .route("/api/analysts/:id", get(analyst_detail))
        .route("/api/analysts/:id/reports", get(analyst_reports))
}

async fn earning_rate_rank(State(state): State<AppState>) -> Result<Response, AppError> {
    let ranked = state
        .rankings
        .rank_analysts(RankMetric::ReturnRate)
        .await
        .map_err(anyhow::Error::from)?;
    Ok(Json(ApiResponse::success(ranked)).into_response())
}

async fn achievement_rate_rank(State(state): State<AppState>) -> Result<Response, AppError> {
    let ranked = state
        .rankings
        .rank_analysts(RankMetric::AchievementRate)
        .await
        .map_err(anyhow::Error::from)?;
    Ok(Json(ApiResponse::success(ranked)).into_response())
}

#[derive(Deserialize)]
struct SectorQuery {
    sector: String,
    #[serde(default)]
    metric: Option<String>,
}

async fn sector_rank(
    State(state): State<AppState>,
    Query(query): Query<SectorQuery>,
) -> Result<Response, AppError> {
    let sector = query.sector.trim();
    if sector.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error("sector must not be empty")),
        )
            .into_response());
    }

    let metric = match query.metric.as_deref() {
        None => RankMetric::ReturnRate,
        Some(s) => match s.parse() {
            Ok(metric) => metric,
            Err(_) => {
                return Ok((
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::<()>::error(format!(
                        "unknown metric {s:?}, expected return-rate or achievement-rate"
                    ))),
                )
                    .into_response());
            }
        },
    };

    let ranked = state
        .rankings
        .rank_analysts_in_sector(metric, sector)
        .await
        .map_err(anyhow::Error::from)?;
    Ok(Json(ApiResponse::success(ranked)).into_response())
}

async fn follower_rank(State(state): State<AppState>) -> Result<Response, AppError> {
    let ranked = state
        .rankings
        .rank_by_followers()
        .await
        .map_err(anyhow::Error::from)?;
    Ok(Json(ApiResponse::success(ranked)).into_response())
}

async fn analyst_detail(
    State(state): State<AppState>,
    Path(analyst_id): Path<i64>,
) -> Result<Response, AppError> {
    match state
        .store
        .get_analyst(analyst_id)
        .await
        .map_err(anyhow::Error::from)?
    {
        Some(analyst) => Ok(Json(ApiResponse::success(analyst)).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error("analyst not found")),
        )
            .into_response()),
    }
}

async fn analyst_reports(
    State(state): State<AppState>,
    Path(analyst_id): Path<i64>,
) -> Result<Response, AppError> {
    let reports: Vec<Report> = state
        .store
        .reports_by_analyst(analyst_id)
        .await
        .map_err(anyhow::Error::from)?;
    Ok(Json(ApiResponse::success(reports)).into_response())
}
