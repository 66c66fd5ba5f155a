//! Caller profile and usage routes

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use listwise_billing::{LimitCheck, MonthlyUsage, Plan, UsageLedger, UsageType, UNLIMITED};
use listwise_shared::{PlanId, Subscription, SubscriptionStatus, UsageRecord};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::{
    auth::Identity,
    error::{ApiError, ApiResult},
    state::AppState,
};

const DEFAULT_HISTORY_MONTHS: u32 = 3;
const MAX_HISTORY_MONTHS: u32 = 24;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSubscription {
    pub id: Uuid,
    pub plan: PlanId,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
    pub plan_details: Option<Plan>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: ProfileUser,
    pub subscription: Option<ProfileSubscription>,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub months: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PeriodBounds {
    pub start: Date,
    pub end: Date,
}

/// One metered counter against its plan cap
#[derive(Debug, Serialize)]
pub struct UsageMeter {
    pub used: i64,
    /// `-1` when unlimited
    pub limit: i64,
    pub remaining: Option<i64>,
    pub percentage: i64,
    pub unlimited: bool,
}

impl From<&LimitCheck> for UsageMeter {
    fn from(check: &LimitCheck) -> Self {
        let unlimited = check.limit == UNLIMITED;
        Self {
            used: check.current,
            limit: check.limit,
            remaining: check.remaining(),
            percentage: usage_percentage(check.current, check.limit),
            unlimited,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMeters {
    pub listings: UsageMeter,
    pub ai_analyses: UsageMeter,
    pub api_calls: UsageMeter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSubscription {
    pub plan: PlanId,
    pub status: SubscriptionStatus,
    pub features: Option<Plan>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub current_period: PeriodBounds,
    pub usage: UsageMeters,
    pub subscription: UsageSubscription,
    /// Oldest month first
    pub history: Vec<MonthlyUsage>,
}

/// Rounded share of the cap used; 0 when unlimited or capped at zero.
fn usage_percentage(used: i64, limit: i64) -> i64 {
    if limit == UNLIMITED || limit <= 0 {
        return 0;
    }
    ((used as f64 / limit as f64) * 100.0).round() as i64
}

fn profile_subscription(state: &AppState, sub: Subscription) -> ProfileSubscription {
    ProfileSubscription {
        plan_details: state.catalog.get(sub.plan).ok().cloned(),
        id: sub.id,
        plan: sub.plan,
        status: sub.status,
        current_period_start: sub.current_period_start,
        current_period_end: sub.current_period_end,
        cancel_at_period_end: sub.cancel_at_period_end,
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Caller's account and current subscription
pub async fn profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<ProfileResponse>> {
    let user = state
        .find_user(identity.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let subscription = state.subscriptions.get_by_user_id(user.id).await?;

    Ok(Json(ProfileResponse {
        user: ProfileUser {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            created_at: user.created_at,
        },
        subscription: subscription.map(|sub| profile_subscription(&state, sub)),
    }))
}

/// Current-period usage against plan caps plus recent monthly history
pub async fn usage(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<UsageResponse>> {
    let months = query
        .months
        .unwrap_or(DEFAULT_HISTORY_MONTHS)
        .clamp(1, MAX_HISTORY_MONTHS);

    let subscription = state
        .subscriptions
        .get_by_user_id(identity.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Subscription not found".to_string()))?;

    let now = OffsetDateTime::now_utc();
    let period = UsageLedger::current_period(now);
    // Reading usage never opens a record
    let record = state
        .ledger
        .find_current(identity.user_id, now)
        .await?
        .unwrap_or_else(|| {
            UsageRecord::empty(identity.user_id, subscription.id, period.start, period.end, now)
        });

    let meter = |usage_type: UsageType| -> ApiResult<UsageMeter> {
        let check = state
            .enforcer
            .check_usage(&subscription, &record, usage_type)?;
        Ok(UsageMeter::from(&check))
    };
    let usage = UsageMeters {
        listings: meter(UsageType::Listings)?,
        ai_analyses: meter(UsageType::AiAnalysis)?,
        api_calls: meter(UsageType::ApiCalls)?,
    };

    let history = state
        .ledger
        .usage_history(identity.user_id, months, now)
        .await?;

    Ok(Json(UsageResponse {
        current_period: PeriodBounds {
            start: period.start,
            end: period.end,
        },
        usage,
        subscription: UsageSubscription {
            plan: subscription.plan,
            status: subscription.status,
            features: state.catalog.get(subscription.plan).ok().cloned(),
        },
        history,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percentage() {
        assert_eq!(usage_percentage(50, 100), 50);
        assert_eq!(usage_percentage(1, 3), 33);
        assert_eq!(usage_percentage(120, 100), 120);
        assert_eq!(usage_percentage(5_000, UNLIMITED), 0);
        assert_eq!(usage_percentage(0, 0), 0);
    }

    #[test]
    fn test_meter_reports_remaining() {
        let check = LimitCheck {
            allowed: true,
            current: 40,
            limit: 100,
            denial: None,
        };
        let meter = UsageMeter::from(&check);
        assert_eq!(meter.remaining, Some(60));
        assert!(!meter.unlimited);
    }
}
