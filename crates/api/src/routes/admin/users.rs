//! Admin user management

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use listwise_shared::{PlanId, Subscription, SubscriptionStatus, UsageRecord, User};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::shared::{PageQuery, Pagination};
use crate::{
    auth::Identity,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSubscriptionSummary {
    pub id: Uuid,
    pub plan: PlanId,
    pub status: SubscriptionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserSummary {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub is_admin: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub subscription: Option<AdminSubscriptionSummary>,
}

#[derive(Debug, Serialize)]
pub struct AdminUserListResponse {
    pub users: Vec<AdminUserSummary>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserDetailResponse {
    pub user: User,
    pub is_admin: bool,
    pub subscription: Option<Subscription>,
    pub current_usage: Option<UsageRecord>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub plan: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusResponse {
    pub message: &'static str,
    pub user_id: Uuid,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct UpdateSubscriptionResponse {
    pub message: &'static str,
    pub subscription: Subscription,
}

/// Users newest first, with their current subscription
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<AdminUserListResponse>> {
    let (limit, offset) = query.bounds();
    let users = state.list_users(limit, offset).await?;

    let mut summaries = Vec::with_capacity(users.len());
    for user in users {
        let subscription = state.subscriptions.get_by_user_id(user.id).await?;
        summaries.push(AdminUserSummary {
            is_admin: state.config.is_admin(user.id),
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            is_active: user.is_active,
            created_at: user.created_at,
            subscription: subscription.map(|s| AdminSubscriptionSummary {
                id: s.id,
                plan: s.plan,
                status: s.status,
            }),
        });
    }

    Ok(Json(AdminUserListResponse {
        pagination: Pagination {
            limit,
            offset,
            total: summaries.len(),
        },
        users: summaries,
    }))
}

/// One user with subscription and current-period usage
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<AdminUserDetailResponse>> {
    let user = state
        .find_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let subscription = state.subscriptions.get_by_user_id(user_id).await?;
    let current_usage = state
        .ledger
        .find_current(user_id, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(AdminUserDetailResponse {
        is_admin: state.config.is_admin(user.id),
        user,
        subscription,
        current_usage,
    }))
}

/// Local plan/status correction; the billing service is not called
pub async fn update_user_subscription(
    State(state): State<AppState>,
    Extension(admin): Extension<Identity>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<UpdateSubscriptionResponse>> {
    let plan = req
        .plan
        .as_deref()
        .map(|raw| {
            raw.parse::<PlanId>()
                .map_err(|_| ApiError::Validation(format!("Unknown plan: {}", raw)))
        })
        .transpose()?;
    let status = req
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<SubscriptionStatus>()
                .map_err(|_| ApiError::Validation(format!("Unknown status: {}", raw)))
        })
        .transpose()?;

    let subscription = state
        .lifecycle
        .admin_override(user_id, plan, status)
        .await?;

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %user_id,
        plan = %subscription.plan,
        status = %subscription.status,
        "Admin updated user subscription"
    );

    Ok(Json(UpdateSubscriptionResponse {
        message: "Subscription updated successfully",
        subscription,
    }))
}

/// Activate or deactivate an account
pub async fn update_user_status(
    State(state): State<AppState>,
    Extension(admin): Extension<Identity>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<UpdateStatusResponse>> {
    if admin.user_id == user_id && !req.is_active {
        return Err(ApiError::BadRequest(
            "Admins cannot deactivate their own account".to_string(),
        ));
    }

    if !state.set_user_active(user_id, req.is_active).await? {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %user_id,
        is_active = req.is_active,
        "Admin changed user status"
    );

    Ok(Json(UpdateStatusResponse {
        message: "User status updated successfully",
        user_id,
        is_active: req.is_active,
    }))
}
