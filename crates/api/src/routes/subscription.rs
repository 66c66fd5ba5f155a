//! Subscription routes

use axum::{extract::State, Extension, Json};
use listwise_billing::Plan;
use listwise_shared::{PlanId, Subscription};
use serde::{Deserialize, Serialize};

use crate::{
    auth::Identity,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct PlansResponse {
    pub plans: Vec<Plan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanRequest {
    pub new_plan: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalRequest {
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub message: &'static str,
    pub subscription: Subscription,
}

/// Public plan catalog
pub async fn list_plans(State(state): State<AppState>) -> Json<PlansResponse> {
    Json(PlansResponse {
        plans: state.catalog.plans().to_vec(),
    })
}

/// Switch the caller's subscription to another plan
pub async fn update_plan(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UpdatePlanRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let plan = req
        .new_plan
        .parse::<PlanId>()
        .map_err(|_| ApiError::Validation(format!("Unknown plan: {}", req.new_plan)))?;

    let subscription = state.lifecycle.change_plan(identity.user_id, plan).await?;

    Ok(Json(SubscriptionResponse {
        message: "Subscription plan updated successfully",
        subscription,
    }))
}

/// Cancel now, or at the end of the paid period
pub async fn cancel(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let Json(req) = body.unwrap_or_default();
    let subscription = state.lifecycle.cancel(identity.user_id, req.immediate).await?;

    Ok(Json(SubscriptionResponse {
        message: if req.immediate {
            "Subscription cancelled"
        } else {
            "Subscription will be cancelled at the end of the current period"
        },
        subscription,
    }))
}

/// Hand the caller a billing-portal link that returns to `returnUrl`
pub async fn billing_portal(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<PortalRequest>,
) -> ApiResult<Json<PortalResponse>> {
    let return_url = req
        .return_url
        .as_deref()
        .map(str::trim)
        .filter(|url| url.starts_with("https://") || url.starts_with("http://"))
        .ok_or_else(|| ApiError::Validation("returnUrl must be an http(s) URL".to_string()))?;

    let url = state
        .lifecycle
        .billing_portal(identity.user_id, return_url)
        .await?;

    Ok(Json(PortalResponse { url }))
}
