//! Plan-gated admission endpoints
//!
//! Listing and analysis work enters through these routes. The gates in
//! [`crate::access`] have already admitted the request by the time a handler
//! runs; handlers validate the payload, report how many units the request
//! consumes and answer `202 Accepted` with the quota left afterwards.

use axum::{extract::State, http::StatusCode, Extension, Json};
use listwise_billing::{Marketplace, MonthlyUsage, UsageType};
use listwise_shared::PlanId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    access::{AccessContext, Consumption},
    error::{ApiError, ApiResult},
    state::AppState,
};

const MAX_BULK_LISTINGS: usize = 100;
const ADVANCED_HISTORY_MONTHS: u32 = 12;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRequest {
    pub title: String,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkListingRequest {
    pub listings: Vec<ListingRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub listing_id: Option<Uuid>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub accepted: bool,
    pub request_id: Uuid,
    pub usage_type: UsageType,
    pub units: i64,
    /// `None` when the plan is unlimited for this usage type
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<Marketplace>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedAnalyticsResponse {
    pub plan: PlanId,
    pub history: Vec<MonthlyUsage>,
}

type Accepted = (StatusCode, Extension<Consumption>, Json<Admission>);

// =============================================================================
// Helpers
// =============================================================================

fn validate_listing(listing: &ListingRequest) -> ApiResult<()> {
    let title = listing.title.trim();
    if title.is_empty() || title.len() > 200 {
        return Err(ApiError::Validation(
            "title must be between 1 and 200 characters".to_string(),
        ));
    }
    if listing.price_cents.is_some_and(|p| p < 0) {
        return Err(ApiError::Validation(
            "priceCents must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Refuse when `units` would not fit in what is left this period.
fn ensure_room(
    state: &AppState,
    context: &AccessContext,
    usage_type: UsageType,
    units: i64,
) -> ApiResult<Option<i64>> {
    let check = state
        .enforcer
        .check_usage(&context.subscription, &context.usage, usage_type)?;
    match check.remaining() {
        None => Ok(None),
        Some(left) if units <= left => Ok(Some(left - units)),
        Some(_) => Err(ApiError::QuotaExceeded {
            limit: check.limit,
            current: check.current,
            plan: context.subscription.plan,
        }),
    }
}

fn accepted(
    usage_type: UsageType,
    units: i64,
    remaining: Option<i64>,
    marketplace: Option<Marketplace>,
    metadata: serde_json::Value,
) -> Accepted {
    (
        StatusCode::ACCEPTED,
        Extension(Consumption::new(usage_type, units, metadata)),
        Json(Admission {
            accepted: true,
            request_id: Uuid::new_v4(),
            usage_type,
            units,
            remaining,
            marketplace,
        }),
    )
}

// =============================================================================
// Handlers
// =============================================================================

/// Create one listing
pub async fn create_listing(
    State(state): State<AppState>,
    Extension(context): Extension<AccessContext>,
    Json(req): Json<ListingRequest>,
) -> ApiResult<Accepted> {
    validate_listing(&req)?;
    let remaining = ensure_room(&state, &context, UsageType::Listings, 1)?;

    Ok(accepted(
        UsageType::Listings,
        1,
        remaining,
        None,
        json!({ "title": req.title.trim() }),
    ))
}

/// Create several listings at once; the whole batch must fit in the quota
pub async fn create_listings_bulk(
    State(state): State<AppState>,
    Extension(context): Extension<AccessContext>,
    Json(req): Json<BulkListingRequest>,
) -> ApiResult<Accepted> {
    if req.listings.is_empty() {
        return Err(ApiError::Validation("listings must not be empty".to_string()));
    }
    if req.listings.len() > MAX_BULK_LISTINGS {
        return Err(ApiError::Validation(format!(
            "at most {} listings per bulk upload",
            MAX_BULK_LISTINGS
        )));
    }
    for listing in &req.listings {
        validate_listing(listing)?;
    }

    let units = req.listings.len() as i64;
    let remaining = ensure_room(&state, &context, UsageType::Listings, units)?;

    tracing::info!(
        user_id = %context.user_id,
        units = units,
        "Bulk listing upload admitted"
    );

    Ok(accepted(
        UsageType::Listings,
        units,
        remaining,
        None,
        json!({ "bulk": true }),
    ))
}

/// Create a listing on a specific marketplace
pub async fn create_marketplace_listing(
    State(state): State<AppState>,
    Extension(context): Extension<AccessContext>,
    Extension(marketplace): Extension<Marketplace>,
    Json(req): Json<ListingRequest>,
) -> ApiResult<Accepted> {
    validate_listing(&req)?;
    let remaining = ensure_room(&state, &context, UsageType::Listings, 1)?;

    Ok(accepted(
        UsageType::Listings,
        1,
        remaining,
        Some(marketplace),
        json!({ "title": req.title.trim(), "marketplace": marketplace }),
    ))
}

/// Run an AI analysis
pub async fn request_analysis(
    State(state): State<AppState>,
    Extension(context): Extension<AccessContext>,
    Json(req): Json<AnalysisRequest>,
) -> ApiResult<Accepted> {
    let has_content = req.content.as_deref().is_some_and(|c| !c.trim().is_empty());
    if req.listing_id.is_none() && !has_content {
        return Err(ApiError::Validation(
            "listingId or content is required".to_string(),
        ));
    }
    let remaining = ensure_room(&state, &context, UsageType::AiAnalysis, 1)?;

    Ok(accepted(
        UsageType::AiAnalysis,
        1,
        remaining,
        None,
        json!({ "listingId": req.listing_id }),
    ))
}

/// Twelve months of usage history, for plans with advanced analytics
pub async fn advanced_analytics(
    State(state): State<AppState>,
    Extension(context): Extension<AccessContext>,
) -> ApiResult<Json<AdvancedAnalyticsResponse>> {
    let history = state
        .ledger
        .usage_history(
            context.user_id,
            ADVANCED_HISTORY_MONTHS,
            OffsetDateTime::now_utc(),
        )
        .await?;

    Ok(Json(AdvancedAnalyticsResponse {
        plan: context.subscription.plan,
        history,
    }))
}
