//! Plan catalog
//!
//! Static registry of the three subscription tiers and what each one unlocks.
//! A capability is either a numeric limit (`-1` = unlimited) or a boolean flag.
//! The catalog is checked once at startup by [`PlanCatalog::validate`]; a
//! failing catalog aborts the process.

use std::collections::BTreeMap;

use listwise_shared::PlanId;
use serde::Serialize;

use crate::error::{BillingError, BillingResult};

/// Sentinel for "no cap"
pub const UNLIMITED: i64 = -1;

/// Capability a plan can grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    MonthlyListingLimit,
    AiAnalysisLimit,
    MarketplaceCount,
    BulkUploadEnabled,
    AdvancedAnalyticsEnabled,
    PrioritySupport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Numeric,
    Flag,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::MonthlyListingLimit,
        Feature::AiAnalysisLimit,
        Feature::MarketplaceCount,
        Feature::BulkUploadEnabled,
        Feature::AdvancedAnalyticsEnabled,
        Feature::PrioritySupport,
    ];

    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::MonthlyListingLimit | Feature::AiAnalysisLimit | Feature::MarketplaceCount => {
                FeatureKind::Numeric
            }
            Feature::BulkUploadEnabled
            | Feature::AdvancedAnalyticsEnabled
            | Feature::PrioritySupport => FeatureKind::Flag,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::MonthlyListingLimit => "monthlyListingLimit",
            Feature::AiAnalysisLimit => "aiAnalysisLimit",
            Feature::MarketplaceCount => "marketplaceCount",
            Feature::BulkUploadEnabled => "bulkUploadEnabled",
            Feature::AdvancedAnalyticsEnabled => "advancedAnalyticsEnabled",
            Feature::PrioritySupport => "prioritySupport",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("Unknown feature: {}", s))
    }
}

/// Value of a capability in a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Limit(i64),
    Flag(bool),
}

impl FeatureValue {
    pub fn kind(&self) -> FeatureKind {
        match self {
            FeatureValue::Limit(_) => FeatureKind::Numeric,
            FeatureValue::Flag(_) => FeatureKind::Flag,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, FeatureValue::Limit(UNLIMITED))
    }
}

/// Orders limits with `-1` above every finite value.
fn limit_rank(limit: i64) -> i64 {
    if limit == UNLIMITED {
        i64::MAX
    } else {
        limit
    }
}

/// Subscription tier definition
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: PlanId,
    pub name: &'static str,
    pub monthly_price_cents: i64,
    pub currency: &'static str,
    pub billing_interval: &'static str,
    pub features: BTreeMap<Feature, FeatureValue>,
}

impl Plan {
    fn monthly(
        id: PlanId,
        name: &'static str,
        monthly_price_cents: i64,
        features: &[(Feature, FeatureValue)],
    ) -> Self {
        Self {
            id,
            name,
            monthly_price_cents,
            currency: "usd",
            billing_interval: "month",
            features: features.iter().copied().collect(),
        }
    }

    pub fn feature(&self, feature: Feature) -> Option<FeatureValue> {
        self.features.get(&feature).copied()
    }
}

/// Registry of plans, cheapest first
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(mut plans: Vec<Plan>) -> Self {
        plans.sort_by_key(|p| p.id);
        Self { plans }
    }

    /// The production catalog
    pub fn standard() -> Self {
        use Feature::*;
        use FeatureValue::{Flag, Limit};

        Self::new(vec![
            Plan::monthly(
                PlanId::Basic,
                "Basic",
                2_900,
                &[
                    (MonthlyListingLimit, Limit(100)),
                    (AiAnalysisLimit, Limit(50)),
                    (MarketplaceCount, Limit(1)),
                    (BulkUploadEnabled, Flag(false)),
                    (AdvancedAnalyticsEnabled, Flag(false)),
                    (PrioritySupport, Flag(false)),
                ],
            ),
            Plan::monthly(
                PlanId::Pro,
                "Pro",
                6_700,
                &[
                    (MonthlyListingLimit, Limit(500)),
                    (AiAnalysisLimit, Limit(250)),
                    (MarketplaceCount, Limit(2)),
                    (BulkUploadEnabled, Flag(true)),
                    (AdvancedAnalyticsEnabled, Flag(true)),
                    (PrioritySupport, Flag(false)),
                ],
            ),
            Plan::monthly(
                PlanId::Enterprise,
                "Enterprise",
                9_700,
                &[
                    (MonthlyListingLimit, Limit(UNLIMITED)),
                    (AiAnalysisLimit, Limit(UNLIMITED)),
                    (MarketplaceCount, Limit(3)),
                    (BulkUploadEnabled, Flag(true)),
                    (AdvancedAnalyticsEnabled, Flag(true)),
                    (PrioritySupport, Flag(true)),
                ],
            ),
        ])
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn get(&self, id: PlanId) -> BillingResult<&Plan> {
        self.plans
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| BillingError::Config(format!("plan {} missing from catalog", id)))
    }

    /// Look up a plan by its wire name. Unknown names are configuration errors.
    pub fn get_by_str(&self, id: &str) -> BillingResult<&Plan> {
        let id = id.parse::<PlanId>().map_err(BillingError::Config)?;
        self.get(id)
    }

    pub fn resolve_feature_limit(&self, id: PlanId, feature: Feature) -> BillingResult<FeatureValue> {
        self.get(id)?.feature(feature).ok_or_else(|| {
            BillingError::Config(format!("plan {} does not define {}", id, feature))
        })
    }

    /// Cheapest plan whose value for `feature` satisfies `accept`.
    pub fn lowest_plan_with<F>(&self, feature: Feature, accept: F) -> Option<&Plan>
    where
        F: Fn(FeatureValue) -> bool,
    {
        self.plans
            .iter()
            .find(|p| p.feature(feature).map(&accept).unwrap_or(false))
    }

    /// Closed-world and monotonicity check, run at startup.
    pub fn validate(&self) -> BillingResult<()> {
        for id in PlanId::ALL {
            let count = self.plans.iter().filter(|p| p.id == id).count();
            if count != 1 {
                return Err(BillingError::Config(format!(
                    "plan {} defined {} times, expected once",
                    id, count
                )));
            }
        }

        for plan in &self.plans {
            for feature in Feature::ALL {
                let value = plan.feature(feature).ok_or_else(|| {
                    BillingError::Config(format!("plan {} does not define {}", plan.id, feature))
                })?;
                if value.kind() != feature.kind() {
                    return Err(BillingError::Config(format!(
                        "plan {} gives {} a value of the wrong kind",
                        plan.id, feature
                    )));
                }
                if let FeatureValue::Limit(n) = value {
                    if n < 0 && n != UNLIMITED {
                        return Err(BillingError::Config(format!(
                            "plan {} has negative {} ({})",
                            plan.id, feature, n
                        )));
                    }
                }
            }
            if plan.features.len() != Feature::ALL.len() {
                return Err(BillingError::Config(format!(
                    "plan {} defines unrecognised features",
                    plan.id
                )));
            }
        }

        for pair in self.plans.windows(2) {
            let (lower, higher) = (&pair[0], &pair[1]);
            for feature in Feature::ALL {
                let ok = match (lower.feature(feature), higher.feature(feature)) {
                    (Some(FeatureValue::Limit(lo)), Some(FeatureValue::Limit(hi))) => {
                        limit_rank(hi) >= limit_rank(lo)
                    }
                    (Some(FeatureValue::Flag(lo)), Some(FeatureValue::Flag(hi))) => hi || !lo,
                    _ => false,
                };
                if !ok {
                    return Err(BillingError::Config(format!(
                        "plan {} grants less {} than {}",
                        higher.id, feature, lower.id
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_is_valid() {
        PlanCatalog::standard().validate().unwrap();
    }

    #[test]
    fn test_basic_plan_values() {
        let catalog = PlanCatalog::standard();
        let basic = catalog.get(PlanId::Basic).unwrap();
        assert_eq!(basic.monthly_price_cents, 2_900);
        assert_eq!(basic.currency, "usd");
        assert_eq!(
            catalog
                .resolve_feature_limit(PlanId::Basic, Feature::MonthlyListingLimit)
                .unwrap(),
            FeatureValue::Limit(100)
        );
        assert_eq!(
            catalog
                .resolve_feature_limit(PlanId::Basic, Feature::BulkUploadEnabled)
                .unwrap(),
            FeatureValue::Flag(false)
        );
    }

    #[test]
    fn test_enterprise_is_unlimited() {
        let catalog = PlanCatalog::standard();
        let value = catalog
            .resolve_feature_limit(PlanId::Enterprise, Feature::AiAnalysisLimit)
            .unwrap();
        assert!(value.is_unlimited());
    }

    #[test]
    fn test_unknown_plan_string_is_config_error() {
        let catalog = PlanCatalog::standard();
        let err = catalog.get_by_str("platinum").unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[test]
    fn test_higher_tiers_never_grant_less() {
        let catalog = PlanCatalog::standard();
        for feature in Feature::ALL {
            let values: Vec<FeatureValue> = catalog
                .plans()
                .iter()
                .map(|p| p.feature(feature).unwrap())
                .collect();
            for pair in values.windows(2) {
                match (pair[0], pair[1]) {
                    (FeatureValue::Limit(lo), FeatureValue::Limit(hi)) => {
                        assert!(limit_rank(hi) >= limit_rank(lo), "{} regressed", feature)
                    }
                    (FeatureValue::Flag(lo), FeatureValue::Flag(hi)) => {
                        assert!(hi || !lo, "{} regressed", feature)
                    }
                    _ => panic!("mixed kinds for {}", feature),
                }
            }
        }
    }

    #[test]
    fn test_validate_rejects_regressing_limit() {
        let mut plans = PlanCatalog::standard().plans().to_vec();
        plans[1]
            .features
            .insert(Feature::MonthlyListingLimit, FeatureValue::Limit(50));
        let err = PlanCatalog::new(plans).validate().unwrap_err();
        assert!(err.to_string().contains("monthlyListingLimit"));
    }

    #[test]
    fn test_validate_rejects_unlimited_followed_by_finite() {
        let mut plans = PlanCatalog::standard().plans().to_vec();
        plans[1]
            .features
            .insert(Feature::AiAnalysisLimit, FeatureValue::Limit(UNLIMITED));
        plans[2]
            .features
            .insert(Feature::AiAnalysisLimit, FeatureValue::Limit(10_000));
        assert!(PlanCatalog::new(plans).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_feature() {
        let mut plans = PlanCatalog::standard().plans().to_vec();
        plans[0].features.remove(&Feature::PrioritySupport);
        assert!(PlanCatalog::new(plans).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_kind() {
        let mut plans = PlanCatalog::standard().plans().to_vec();
        plans[0]
            .features
            .insert(Feature::BulkUploadEnabled, FeatureValue::Limit(1));
        assert!(PlanCatalog::new(plans).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_tier() {
        let plans = PlanCatalog::standard().plans()[..2].to_vec();
        assert!(PlanCatalog::new(plans).validate().is_err());
    }

    #[test]
    fn test_lowest_plan_with_marketplace_count() {
        let catalog = PlanCatalog::standard();
        let plan = catalog
            .lowest_plan_with(Feature::MarketplaceCount, |v| {
                matches!(v, FeatureValue::Limit(n) if n == UNLIMITED || n >= 2)
            })
            .unwrap();
        assert_eq!(plan.id, PlanId::Pro);
    }

    #[test]
    fn test_feature_names_round_trip() {
        for feature in Feature::ALL {
            assert_eq!(feature.as_str().parse::<Feature>().unwrap(), feature);
        }
    }

    #[test]
    fn test_plan_serializes_features_by_name() {
        let catalog = PlanCatalog::standard();
        let value = serde_json::to_value(catalog.get(PlanId::Pro).unwrap()).unwrap();
        assert_eq!(value["features"]["monthlyListingLimit"], 500);
        assert_eq!(value["features"]["bulkUploadEnabled"], true);
        assert_eq!(value["monthlyPriceCents"], 6700);
    }
}
