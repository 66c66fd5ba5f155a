//! Admin subscription views

use axum::{
    extract::{Query, State},
    Json,
};
use listwise_billing::SubscriptionStats;
use listwise_shared::Subscription;
use serde::Serialize;

use super::shared::{PageQuery, Pagination};
use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
pub struct AdminSubscriptionListResponse {
    pub subscriptions: Vec<Subscription>,
    pub pagination: Pagination,
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<AdminSubscriptionListResponse>> {
    let (limit, offset) = query.bounds();
    let subscriptions = state.subscriptions.list(limit, offset).await?;

    Ok(Json(AdminSubscriptionListResponse {
        pagination: Pagination {
            limit,
            offset,
            total: subscriptions.len(),
        },
        subscriptions,
    }))
}

/// Counts by plan and status plus monthly revenue at catalog prices
pub async fn subscription_stats(
    State(state): State<AppState>,
) -> ApiResult<Json<SubscriptionStats>> {
    Ok(Json(state.analytics.subscription_stats().await?))
}
