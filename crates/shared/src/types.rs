//! Records shared across Listwise

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Subscription plan identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Basic,
    Pro,
    Enterprise,
}

impl PlanId {
    /// All plans, cheapest first
    pub const ALL: [PlanId; 3] = [PlanId::Basic, PlanId::Pro, PlanId::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(format!("Invalid plan: {}", s)),
        }
    }
}

/// Local subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Cancelled,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 5] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::Trialing,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Unpaid,
        SubscriptionStatus::Cancelled,
    ];

    /// Only active and trialing subscriptions grant access.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "past_due" => Ok(Self::PastDue),
            "unpaid" => Ok(Self::Unpaid),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub billing_customer_ref: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Per-user subscription state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub billing_account_ref: Option<String>,
    pub billing_subscription_ref: Option<String>,
    pub plan: PlanId,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Partial update to a subscription; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionPatch {
    pub plan: Option<PlanId>,
    pub status: Option<SubscriptionStatus>,
    pub billing_subscription_ref: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: Option<bool>,
}

impl SubscriptionPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch in place and stamp `updated_at`.
    pub fn apply(&self, sub: &mut Subscription, now: OffsetDateTime) {
        if let Some(plan) = self.plan {
            sub.plan = plan;
        }
        if let Some(status) = self.status {
            sub.status = status;
        }
        if let Some(ref external) = self.billing_subscription_ref {
            sub.billing_subscription_ref = Some(external.clone());
        }
        if let Some(start) = self.current_period_start {
            sub.current_period_start = start;
        }
        if let Some(end) = self.current_period_end {
            sub.current_period_end = end;
        }
        if let Some(flag) = self.cancel_at_period_end {
            sub.cancel_at_period_end = flag;
        }
        sub.updated_at = now;
    }
}

/// Metered counter within a usage record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageCounter {
    ListingsCreated,
    AiAnalysesUsed,
    ApiCallsMade,
}

impl UsageCounter {
    pub fn column(&self) -> &'static str {
        match self {
            Self::ListingsCreated => "listings_created",
            Self::AiAnalysesUsed => "ai_analyses_used",
            Self::ApiCallsMade => "api_calls_made",
        }
    }
}

/// Per-user counters for one calendar month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub period_start: Date,
    pub period_end: Date,
    pub listings_created: i64,
    pub ai_analyses_used: i64,
    pub api_calls_made: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl UsageRecord {
    /// A zeroed record for the given period
    pub fn empty(
        user_id: Uuid,
        subscription_id: Uuid,
        period_start: Date,
        period_end: Date,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            subscription_id,
            period_start,
            period_end,
            listings_created: 0,
            ai_analyses_used: 0,
            api_calls_made: 0,
            created_at: now,
        }
    }

    pub fn counter(&self, counter: UsageCounter) -> i64 {
        match counter {
            UsageCounter::ListingsCreated => self.listings_created,
            UsageCounter::AiAnalysesUsed => self.ai_analyses_used,
            UsageCounter::ApiCallsMade => self.api_calls_made,
        }
    }

    pub fn counter_mut(&mut self, counter: UsageCounter) -> &mut i64 {
        match counter {
            UsageCounter::ListingsCreated => &mut self.listings_created,
            UsageCounter::AiAnalysesUsed => &mut self.ai_analyses_used,
            UsageCounter::ApiCallsMade => &mut self.api_calls_made,
        }
    }
}

/// Append-only record of a single metered action, kept for analytics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedUsageEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub subscription_plan: PlanId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn sample_subscription() -> Subscription {
        let now = datetime!(2024-03-10 12:00 UTC);
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            billing_account_ref: Some("cus_1".to_string()),
            billing_subscription_ref: Some("sub_1".to_string()),
            plan: PlanId::Basic,
            status: SubscriptionStatus::Trialing,
            current_period_start: now,
            current_period_end: now,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_plan_id_round_trip_through_str() {
        for plan in PlanId::ALL {
            assert_eq!(plan.to_string().parse::<PlanId>().unwrap(), plan);
        }
        assert!("gold".parse::<PlanId>().is_err());
        assert_eq!("PRO".parse::<PlanId>().unwrap(), PlanId::Pro);
    }

    #[test]
    fn test_status_is_active() {
        assert!(SubscriptionStatus::Active.is_active());
        assert!(SubscriptionStatus::Trialing.is_active());
        assert!(!SubscriptionStatus::PastDue.is_active());
        assert!(!SubscriptionStatus::Unpaid.is_active());
        assert!(!SubscriptionStatus::Cancelled.is_active());
    }

    #[test]
    fn test_status_accepts_american_spelling() {
        assert_eq!(
            "canceled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Cancelled
        );
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SubscriptionStatus::PastDue).unwrap();
        assert_eq!(json, "\"past_due\"");
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let mut sub = sample_subscription();
        let before = sub.clone();
        let later = datetime!(2024-03-11 08:00 UTC);

        SubscriptionPatch {
            status: Some(SubscriptionStatus::Cancelled),
            ..Default::default()
        }
        .apply(&mut sub, later);

        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert_eq!(sub.plan, before.plan);
        assert_eq!(sub.billing_subscription_ref, before.billing_subscription_ref);
        assert_eq!(sub.updated_at, later);
        assert_eq!(sub.created_at, before.created_at);
    }

    #[test]
    fn test_usage_record_counters() {
        let mut record = UsageRecord::empty(
            Uuid::new_v4(),
            Uuid::new_v4(),
            date!(2024 - 03 - 01),
            date!(2024 - 03 - 31),
            datetime!(2024-03-10 12:00 UTC),
        );
        *record.counter_mut(UsageCounter::AiAnalysesUsed) += 3;
        assert_eq!(record.counter(UsageCounter::AiAnalysesUsed), 3);
        assert_eq!(record.counter(UsageCounter::ListingsCreated), 0);
    }

    #[test]
    fn test_detailed_event_serializes_type_field() {
        let event = DetailedUsageEvent {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event_type: "listings".to_string(),
            metadata: serde_json::json!({"marketplace": "ebay"}),
            timestamp: datetime!(2024-03-10 12:00 UTC),
            subscription_plan: PlanId::Pro,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "listings");
        assert_eq!(value["subscriptionPlan"], "pro");
    }
}
