//! Plan-gated admission
//!
//! A request passes through `require_auth` and then one or more gates. Each
//! gate loads (or reuses) the caller's subscription and current-period usage,
//! asks the [`QuotaEnforcer`] and either rejects the request or lets it
//! through with an [`AccessContext`] attached. Quota gates report consumption
//! to the ledger once the handler has answered with a success status.

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    Router,
};
use listwise_billing::{Denial, Feature, Marketplace, UsageType};
use listwise_shared::{Subscription, UsageRecord};
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::Identity, error::ApiError, state::AppState};

/// One admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// One more unit of the usage type must fit in the plan's monthly cap
    Quota(UsageType),
    /// The plan must enable the capability
    Feature(Feature),
    /// The plan's marketplace count must reach the marketplace
    Marketplace(Marketplace),
}

/// Subscription and usage snapshot loaded by the first gate
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub subscription: Subscription,
    pub usage: UsageRecord,
}

/// Set by a handler on its response to report more than one unit, or to
/// attach details to the usage event.
#[derive(Debug, Clone)]
pub struct Consumption {
    pub usage_type: UsageType,
    pub units: i64,
    pub metadata: Value,
}

impl Consumption {
    pub fn new(usage_type: UsageType, units: i64, metadata: Value) -> Self {
        Self {
            usage_type,
            units,
            metadata,
        }
    }
}

/// Wrap `router` in `gates`, evaluated in the order given.
pub fn guarded(state: &AppState, router: Router<AppState>, gates: &[Gate]) -> Router<AppState> {
    gates.iter().rev().fold(router, |router, gate| {
        router.route_layer(middleware::from_fn_with_state(
            (state.clone(), *gate),
            enforce,
        ))
    })
}

async fn load_context(
    state: &AppState,
    identity: &Identity,
    now: OffsetDateTime,
) -> Result<AccessContext, ApiError> {
    let subscription = state
        .subscriptions
        .get_by_user_id(identity.user_id)
        .await?
        .ok_or(ApiError::SubscriptionRequired)?;

    if !subscription.status.is_active() {
        tracing::info!(
            user_id = %identity.user_id,
            status = %subscription.status,
            "Request refused: subscription not active"
        );
        return Err(ApiError::SubscriptionRequired);
    }

    let usage = state
        .ledger
        .get_or_create(identity.user_id, subscription.id, now)
        .await?;

    Ok(AccessContext {
        user_id: identity.user_id,
        subscription_id: subscription.id,
        subscription,
        usage,
    })
}

fn refusal(denial: Option<Denial>) -> ApiError {
    match denial {
        Some(Denial::InactiveSubscription { .. }) => ApiError::SubscriptionRequired,
        Some(Denial::QuotaExhausted {
            plan,
            limit,
            current,
            ..
        }) => ApiError::QuotaExceeded {
            limit,
            current,
            plan,
        },
        Some(Denial::FeatureUnavailable { feature, plan }) => ApiError::FeatureUnavailable {
            feature: feature.as_str().to_string(),
            current_plan: plan,
        },
        Some(Denial::MarketplaceLocked {
            marketplace,
            plan,
            required_plan,
        }) => ApiError::MarketplaceUnavailable {
            marketplace,
            current_plan: plan,
            required_plan,
        },
        None => ApiError::Forbidden,
    }
}

fn evaluate(state: &AppState, gate: Gate, context: &AccessContext) -> Result<(), ApiError> {
    let enforcer = &state.enforcer;
    let (allowed, denial) = match gate {
        Gate::Quota(usage_type) => {
            let check = enforcer.check_usage(&context.subscription, &context.usage, usage_type)?;
            (check.allowed, check.denial)
        }
        Gate::Feature(feature) => {
            let check = enforcer.check_feature_access(&context.subscription, feature)?;
            (check.allowed, check.denial)
        }
        Gate::Marketplace(marketplace) => {
            let check = enforcer.check_marketplace_access(&context.subscription, marketplace)?;
            (check.allowed, check.denial)
        }
    };

    if allowed {
        return Ok(());
    }
    tracing::info!(
        user_id = %context.user_id,
        plan = %context.subscription.plan,
        gate = ?gate,
        "Request refused by plan gate"
    );
    Err(refusal(denial))
}

/// Gate middleware. Install through [`guarded`].
pub async fn enforce(
    State((state, gate)): State<(AppState, Gate)>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = req
        .extensions()
        .get::<Identity>()
        .cloned()
        .ok_or(ApiError::Unauthorized)?;
    let now = OffsetDateTime::now_utc();

    let context = match req.extensions().get::<AccessContext>() {
        Some(existing) => existing.clone(),
        None => load_context(&state, &identity, now).await?,
    };

    evaluate(&state, gate, &context)?;

    if let Gate::Marketplace(marketplace) = gate {
        req.extensions_mut().insert(marketplace);
    }
    let route = req.uri().path().to_string();
    req.extensions_mut().insert(context.clone());

    let response = next.run(req).await;

    if let Gate::Quota(usage_type) = gate {
        if response.status().is_success() {
            let consumption = response
                .extensions()
                .get::<Consumption>()
                .filter(|c| c.usage_type == usage_type)
                .cloned()
                .unwrap_or_else(|| Consumption::new(usage_type, 1, Value::Null));
            report(&state, &context, consumption, &route).await;
        }
    }

    Ok(response)
}

/// Post-admission bookkeeping. Failures are logged and never change the
/// response.
async fn report(state: &AppState, context: &AccessContext, consumption: Consumption, route: &str) {
    if consumption.units <= 0 {
        return;
    }
    let now = OffsetDateTime::now_utc();

    if let Err(e) = state
        .ledger
        .increment_counter(
            context.user_id,
            context.subscription_id,
            consumption.usage_type,
            consumption.units,
            now,
        )
        .await
    {
        tracing::warn!(
            user_id = %context.user_id,
            usage_type = %consumption.usage_type,
            units = consumption.units,
            error = %e,
            "Failed to record usage after admitted request"
        );
        return;
    }

    let mut metadata = match consumption.metadata {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    metadata.insert("count".to_string(), json!(consumption.units));
    metadata.insert("route".to_string(), json!(route));

    if let Err(e) = state
        .ledger
        .record_event(
            context.user_id,
            consumption.usage_type.as_str(),
            Value::Object(metadata),
            context.subscription.plan,
            now,
        )
        .await
    {
        tracing::warn!(
            user_id = %context.user_id,
            usage_type = %consumption.usage_type,
            error = %e,
            "Failed to record usage event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listwise_shared::PlanId;

    #[test]
    fn test_quota_denial_becomes_429() {
        let err = refusal(Some(Denial::QuotaExhausted {
            feature: Feature::MonthlyListingLimit,
            plan: PlanId::Basic,
            limit: 100,
            current: 100,
        }));
        assert_eq!(err.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_inactive_denial_is_subscription_required() {
        let err = refusal(Some(Denial::InactiveSubscription {
            status: listwise_shared::SubscriptionStatus::PastDue,
        }));
        assert!(matches!(err, ApiError::SubscriptionRequired));
    }

    #[test]
    fn test_marketplace_denial_carries_required_plan() {
        let err = refusal(Some(Denial::MarketplaceLocked {
            marketplace: Marketplace::Facebook,
            plan: PlanId::Basic,
            required_plan: Some(PlanId::Pro),
        }));
        assert!(matches!(
            err,
            ApiError::MarketplaceUnavailable {
                required_plan: Some(PlanId::Pro),
                ..
            }
        ));
    }
}
