//! Quota enforcer
//!
//! Pure decisions over a subscription, its current usage record and the
//! requested action. Deterministic, no I/O: same inputs, same answer.
//!
//! An inactive subscription is denied before anything else is looked at, and
//! that denial is reported as its own reason so callers can tell "pay your
//! bill" apart from "upgrade your plan".

use std::sync::Arc;

use listwise_shared::{PlanId, Subscription, SubscriptionStatus, UsageCounter, UsageRecord};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::plans::{Feature, FeatureValue, PlanCatalog, UNLIMITED};
use crate::usage::UsageType;

/// Marketplaces a listing can be pushed to, in unlock order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    Ebay,
    Facebook,
    Etsy,
}

impl Marketplace {
    pub const ALL: [Marketplace; 3] = [Marketplace::Ebay, Marketplace::Facebook, Marketplace::Etsy];

    /// Minimum `marketplaceCount` needed to use this marketplace.
    pub fn ordinal(&self) -> i64 {
        match self {
            Marketplace::Ebay => 1,
            Marketplace::Facebook => 2,
            Marketplace::Etsy => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Ebay => "ebay",
            Marketplace::Facebook => "facebook",
            Marketplace::Etsy => "etsy",
        }
    }
}

impl std::fmt::Display for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Marketplace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ebay" => Ok(Marketplace::Ebay),
            "facebook" => Ok(Marketplace::Facebook),
            "etsy" => Ok(Marketplace::Etsy),
            _ => Err(format!("Unknown marketplace: {}", s)),
        }
    }
}

/// Why a check said no
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Denial {
    InactiveSubscription {
        status: SubscriptionStatus,
    },
    QuotaExhausted {
        feature: Feature,
        plan: PlanId,
        limit: i64,
        current: i64,
    },
    FeatureUnavailable {
        feature: Feature,
        plan: PlanId,
    },
    MarketplaceLocked {
        marketplace: Marketplace,
        plan: PlanId,
        required_plan: Option<PlanId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub current: i64,
    /// `-1` when unlimited
    pub limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
}

impl LimitCheck {
    /// Units left before the cap; `None` when unlimited.
    pub fn remaining(&self) -> Option<i64> {
        (self.limit != UNLIMITED).then(|| (self.limit - self.current).max(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureCheck {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceCheck {
    pub allowed: bool,
    /// Cheapest plan unlocking the marketplace
    pub required_plan: Option<PlanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
}

fn counter_for(feature: Feature) -> Option<UsageCounter> {
    match feature {
        Feature::MonthlyListingLimit => Some(UsageCounter::ListingsCreated),
        Feature::AiAnalysisLimit => Some(UsageCounter::AiAnalysesUsed),
        _ => None,
    }
}

fn inactive(subscription: &Subscription) -> Option<Denial> {
    (!subscription.status.is_active()).then_some(Denial::InactiveSubscription {
        status: subscription.status,
    })
}

#[derive(Clone)]
pub struct QuotaEnforcer {
    catalog: Arc<PlanCatalog>,
}

impl QuotaEnforcer {
    pub fn new(catalog: Arc<PlanCatalog>) -> Self {
        Self { catalog }
    }

    /// Whether one more unit of the metered capability `feature` fits.
    /// Compares the pre-increment count: `allowed = current < limit`.
    pub fn check_limit(
        &self,
        subscription: &Subscription,
        usage: &UsageRecord,
        feature: Feature,
    ) -> BillingResult<LimitCheck> {
        let counter = counter_for(feature).ok_or_else(|| {
            BillingError::Config(format!("{} is not a metered capability", feature))
        })?;
        let current = usage.counter(counter);
        let limit = match self.catalog.resolve_feature_limit(subscription.plan, feature)? {
            FeatureValue::Limit(n) => n,
            FeatureValue::Flag(_) => {
                return Err(BillingError::Config(format!("{} is not a numeric limit", feature)))
            }
        };

        if let Some(denial) = inactive(subscription) {
            return Ok(LimitCheck {
                allowed: false,
                current,
                limit,
                denial: Some(denial),
            });
        }

        let allowed = limit == UNLIMITED || current < limit;
        Ok(LimitCheck {
            allowed,
            current,
            limit,
            denial: (!allowed).then_some(Denial::QuotaExhausted {
                feature,
                plan: subscription.plan,
                limit,
                current,
            }),
        })
    }

    /// [`check_limit`](Self::check_limit) keyed by usage type; uncapped types
    /// report `limit = -1`.
    pub fn check_usage(
        &self,
        subscription: &Subscription,
        usage: &UsageRecord,
        usage_type: UsageType,
    ) -> BillingResult<LimitCheck> {
        match usage_type.limit_feature() {
            Some(feature) => self.check_limit(subscription, usage, feature),
            None => {
                let denial = inactive(subscription);
                Ok(LimitCheck {
                    allowed: denial.is_none(),
                    current: usage.counter(usage_type.counter()),
                    limit: UNLIMITED,
                    denial,
                })
            }
        }
    }

    pub fn check_feature_access(
        &self,
        subscription: &Subscription,
        feature: Feature,
    ) -> BillingResult<FeatureCheck> {
        if let Some(denial) = inactive(subscription) {
            return Ok(FeatureCheck {
                allowed: false,
                denial: Some(denial),
            });
        }

        let allowed = match self.catalog.resolve_feature_limit(subscription.plan, feature)? {
            FeatureValue::Flag(enabled) => enabled,
            FeatureValue::Limit(n) => n == UNLIMITED || n > 0,
        };
        Ok(FeatureCheck {
            allowed,
            denial: (!allowed).then_some(Denial::FeatureUnavailable {
                feature,
                plan: subscription.plan,
            }),
        })
    }

    pub fn check_marketplace_access(
        &self,
        subscription: &Subscription,
        marketplace: Marketplace,
    ) -> BillingResult<MarketplaceCheck> {
        let needed = marketplace.ordinal();
        let unlocks = |value: FeatureValue| match value {
            FeatureValue::Limit(n) => n == UNLIMITED || n >= needed,
            FeatureValue::Flag(_) => false,
        };
        let required_plan = self
            .catalog
            .lowest_plan_with(Feature::MarketplaceCount, &unlocks)
            .map(|p| p.id);

        if let Some(denial) = inactive(subscription) {
            return Ok(MarketplaceCheck {
                allowed: false,
                required_plan,
                denial: Some(denial),
            });
        }

        let value = self
            .catalog
            .resolve_feature_limit(subscription.plan, Feature::MarketplaceCount)?;
        let allowed = unlocks(value);
        Ok(MarketplaceCheck {
            allowed,
            required_plan,
            denial: (!allowed).then_some(Denial::MarketplaceLocked {
                marketplace,
                plan: subscription.plan,
                required_plan,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};
    use uuid::Uuid;

    fn enforcer() -> QuotaEnforcer {
        QuotaEnforcer::new(Arc::new(PlanCatalog::standard()))
    }

    fn subscription(plan: PlanId, status: SubscriptionStatus) -> Subscription {
        let now = datetime!(2024-03-10 12:00 UTC);
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            billing_account_ref: None,
            billing_subscription_ref: None,
            plan,
            status,
            current_period_start: now,
            current_period_end: now,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn usage(listings: i64, analyses: i64) -> UsageRecord {
        let mut record = UsageRecord::empty(
            Uuid::new_v4(),
            Uuid::new_v4(),
            date!(2024 - 03 - 01),
            date!(2024 - 03 - 31),
            datetime!(2024-03-01 0:00 UTC),
        );
        record.listings_created = listings;
        record.ai_analyses_used = analyses;
        record
    }

    #[test]
    fn test_basic_at_limit_is_denied() {
        let sub = subscription(PlanId::Basic, SubscriptionStatus::Active);
        let check = enforcer()
            .check_limit(&sub, &usage(100, 0), Feature::MonthlyListingLimit)
            .unwrap();
        assert!(!check.allowed);
        assert_eq!(check.current, 100);
        assert_eq!(check.limit, 100);
        assert!(matches!(check.denial, Some(Denial::QuotaExhausted { .. })));
    }

    #[test]
    fn test_one_below_limit_is_allowed() {
        let sub = subscription(PlanId::Basic, SubscriptionStatus::Active);
        let check = enforcer()
            .check_limit(&sub, &usage(99, 0), Feature::MonthlyListingLimit)
            .unwrap();
        assert!(check.allowed);
        assert_eq!(check.remaining(), Some(1));
        assert!(check.denial.is_none());
    }

    #[test]
    fn test_unlimited_always_allows() {
        let sub = subscription(PlanId::Enterprise, SubscriptionStatus::Active);
        let check = enforcer()
            .check_limit(&sub, &usage(0, 1_000_000_000), Feature::AiAnalysisLimit)
            .unwrap();
        assert!(check.allowed);
        assert_eq!(check.limit, UNLIMITED);
        assert_eq!(check.remaining(), None);
    }

    #[test]
    fn test_inactive_subscription_denied_even_with_headroom() {
        let sub = subscription(PlanId::Enterprise, SubscriptionStatus::PastDue);
        let check = enforcer()
            .check_limit(&sub, &usage(0, 0), Feature::MonthlyListingLimit)
            .unwrap();
        assert!(!check.allowed);
        assert_eq!(
            check.denial,
            Some(Denial::InactiveSubscription {
                status: SubscriptionStatus::PastDue
            })
        );
    }

    #[test]
    fn test_trialing_counts_as_active() {
        let sub = subscription(PlanId::Basic, SubscriptionStatus::Trialing);
        let check = enforcer()
            .check_limit(&sub, &usage(0, 49), Feature::AiAnalysisLimit)
            .unwrap();
        assert!(check.allowed);
    }

    #[test]
    fn test_non_metered_feature_is_config_error() {
        let sub = subscription(PlanId::Basic, SubscriptionStatus::Active);
        let err = enforcer()
            .check_limit(&sub, &usage(0, 0), Feature::MarketplaceCount)
            .unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[test]
    fn test_api_calls_uncapped_but_still_need_active_plan() {
        let enforcer = enforcer();
        let active = subscription(PlanId::Basic, SubscriptionStatus::Active);
        let check = enforcer
            .check_usage(&active, &usage(0, 0), UsageType::ApiCalls)
            .unwrap();
        assert!(check.allowed);
        assert_eq!(check.limit, UNLIMITED);

        let unpaid = subscription(PlanId::Basic, SubscriptionStatus::Unpaid);
        let check = enforcer
            .check_usage(&unpaid, &usage(0, 0), UsageType::ApiCalls)
            .unwrap();
        assert!(!check.allowed);
    }

    #[test]
    fn test_feature_flags_follow_plan() {
        let enforcer = enforcer();
        let basic = subscription(PlanId::Basic, SubscriptionStatus::Active);
        let pro = subscription(PlanId::Pro, SubscriptionStatus::Active);

        let denied = enforcer
            .check_feature_access(&basic, Feature::BulkUploadEnabled)
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(
            denied.denial,
            Some(Denial::FeatureUnavailable {
                feature: Feature::BulkUploadEnabled,
                plan: PlanId::Basic
            })
        );
        assert!(
            enforcer
                .check_feature_access(&pro, Feature::BulkUploadEnabled)
                .unwrap()
                .allowed
        );
        assert!(
            !enforcer
                .check_feature_access(&pro, Feature::PrioritySupport)
                .unwrap()
                .allowed
        );
    }

    #[test]
    fn test_basic_cannot_use_facebook() {
        let sub = subscription(PlanId::Basic, SubscriptionStatus::Active);
        let check = enforcer()
            .check_marketplace_access(&sub, Marketplace::Facebook)
            .unwrap();
        assert!(!check.allowed);
        assert_eq!(check.required_plan, Some(PlanId::Pro));
    }

    #[test]
    fn test_marketplace_ladder() {
        let enforcer = enforcer();
        let pro = subscription(PlanId::Pro, SubscriptionStatus::Active);
        let enterprise = subscription(PlanId::Enterprise, SubscriptionStatus::Active);

        assert!(enforcer.check_marketplace_access(&pro, Marketplace::Ebay).unwrap().allowed);
        assert!(enforcer.check_marketplace_access(&pro, Marketplace::Facebook).unwrap().allowed);
        let etsy = enforcer.check_marketplace_access(&pro, Marketplace::Etsy).unwrap();
        assert!(!etsy.allowed);
        assert_eq!(etsy.required_plan, Some(PlanId::Enterprise));
        assert!(
            enforcer
                .check_marketplace_access(&enterprise, Marketplace::Etsy)
                .unwrap()
                .allowed
        );
    }

    #[test]
    fn test_cancelled_marketplace_check_reports_inactive() {
        let sub = subscription(PlanId::Enterprise, SubscriptionStatus::Cancelled);
        let check = enforcer()
            .check_marketplace_access(&sub, Marketplace::Ebay)
            .unwrap();
        assert!(!check.allowed);
        assert!(matches!(check.denial, Some(Denial::InactiveSubscription { .. })));
    }

    #[test]
    fn test_denial_serializes_with_reason_tag() {
        let denial = Denial::QuotaExhausted {
            feature: Feature::MonthlyListingLimit,
            plan: PlanId::Basic,
            limit: 100,
            current: 100,
        };
        let value = serde_json::to_value(&denial).unwrap();
        assert_eq!(value["reason"], "quota_exhausted");
        assert_eq!(value["plan"], "basic");
    }
}
