//! Admin usage reports and system health

use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use listwise_billing::{FeatureUsageReport, UsageAnalytics};
use serde::Serialize;
use time::OffsetDateTime;

use super::shared::WindowQuery;
use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseHealth {
    pub status: &'static str,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealthResponse {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub version: &'static str,
    pub billing_enabled: bool,
    pub database: DatabaseHealth,
}

/// Usage events over the last `days` days, summarised by type and plan
pub async fn usage_analytics(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<UsageAnalytics>> {
    let report = state
        .analytics
        .usage_analytics(query.days(), OffsetDateTime::now_utc())
        .await?;
    Ok(Json(report))
}

/// Per-user usage with detailed events, plus aggregate counts
pub async fn feature_usage_report(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<FeatureUsageReport>> {
    let report = state
        .analytics
        .feature_usage_report(query.days(), OffsetDateTime::now_utc())
        .await?;
    Ok(Json(report))
}

pub async fn system_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<SystemHealthResponse>) {
    let started = Instant::now();
    let ping = tokio::time::timeout(state.timeouts.store, state.store.health.ping()).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let database = match ping {
        Ok(Ok(())) => DatabaseHealth {
            status: "healthy",
            latency_ms,
            error: None,
        },
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Database health check failed");
            DatabaseHealth {
                status: "unhealthy",
                latency_ms,
                error: Some(e.to_string()),
            }
        }
        Err(_) => {
            tracing::error!(latency_ms = latency_ms, "Database health check timed out");
            DatabaseHealth {
                status: "unhealthy",
                latency_ms,
                error: Some("timed out".to_string()),
            }
        }
    };

    let healthy = database.status == "healthy";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(SystemHealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" },
            timestamp: OffsetDateTime::now_utc(),
            version: env!("CARGO_PKG_VERSION"),
            billing_enabled: state.config.enable_billing,
            database,
        }),
    )
}
