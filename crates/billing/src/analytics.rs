//! Admin reporting over subscriptions, usage records and usage events

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use listwise_shared::{DetailedUsageEvent, PlanId, Subscription, User, UserRepository};
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::{Plan, PlanCatalog};
use crate::subscriptions::SubscriptionStore;
use crate::timeout::{retry_read, CallTimeouts};
use crate::usage::{UsageLedger, UsageType};

const PAGE_SIZE: i64 = 500;
/// Upper bound on users covered by one feature usage report
pub const REPORT_USER_LIMIT: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    pub total_subscriptions: u64,
    /// Active and trialing subscriptions at catalog prices
    pub monthly_revenue_cents: i64,
    pub plan_breakdown: BTreeMap<String, u64>,
    pub status_breakdown: BTreeMap<String, u64>,
}

/// Tally subscriptions by plan and status.
pub fn subscription_stats(subscriptions: &[Subscription], catalog: &PlanCatalog) -> SubscriptionStats {
    let mut stats = SubscriptionStats {
        total_subscriptions: 0,
        monthly_revenue_cents: 0,
        plan_breakdown: BTreeMap::new(),
        status_breakdown: BTreeMap::new(),
    };

    for sub in subscriptions {
        stats.total_subscriptions += 1;
        *stats
            .plan_breakdown
            .entry(sub.plan.as_str().to_string())
            .or_default() += 1;
        *stats
            .status_breakdown
            .entry(sub.status.as_str().to_string())
            .or_default() += 1;

        if sub.status.is_active() {
            stats.monthly_revenue_cents += catalog
                .get(sub.plan)
                .map(|plan| plan.monthly_price_cents)
                .unwrap_or(0);
        }
    }
    stats
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPeriod {
    pub days: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,
}

impl ReportPeriod {
    fn ending_at(days: u32, now: OffsetDateTime) -> Self {
        Self {
            days,
            start_date: now - Duration::days(i64::from(days)),
            end_date: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanUsage {
    pub users: u64,
    pub usage: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_api_calls: i64,
    pub total_listings: i64,
    pub total_ai_analyses: i64,
    pub unique_users: u64,
    pub plan_breakdown: BTreeMap<String, PlanUsage>,
    /// Every event type seen, including non-metered ones
    pub by_type: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAnalytics {
    pub period: ReportPeriod,
    pub summary: UsageSummary,
}

/// Units an event stands for: `metadata.count` when present, else 1.
fn event_units(event: &DetailedUsageEvent) -> i64 {
    event
        .metadata
        .get("count")
        .and_then(|v| v.as_i64())
        .filter(|n| *n >= 0)
        .unwrap_or(1)
}

/// Aggregate detailed events into totals per metered type and per plan.
pub fn summarize_events(events: &[DetailedUsageEvent]) -> UsageSummary {
    let mut summary = UsageSummary::default();
    let mut users = HashSet::new();
    let mut users_per_plan: BTreeMap<String, HashSet<Uuid>> = BTreeMap::new();

    for event in events {
        let units = event_units(event);
        users.insert(event.user_id);

        let plan = event.subscription_plan.as_str().to_string();
        users_per_plan
            .entry(plan.clone())
            .or_default()
            .insert(event.user_id);
        summary.plan_breakdown.entry(plan).or_default().usage += units;
        *summary.by_type.entry(event.event_type.clone()).or_default() += units;

        match event.event_type.parse::<UsageType>() {
            Ok(UsageType::ApiCalls) => summary.total_api_calls += units,
            Ok(UsageType::Listings) => summary.total_listings += units,
            Ok(UsageType::AiAnalysis) => summary.total_ai_analyses += units,
            Err(_) => {}
        }
    }

    for (plan, plan_users) in users_per_plan {
        if let Some(entry) = summary.plan_breakdown.get_mut(&plan) {
            entry.users = plan_users.len() as u64;
        }
    }
    summary.unique_users = users.len() as u64;
    summary
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for ReportUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSubscription {
    pub plan: PlanId,
    pub status: listwise_shared::SubscriptionStatus,
    pub plan_details: Option<Plan>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub listings_created: i64,
    pub ai_analyses_used: i64,
    pub api_calls_made: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUsageReport {
    pub user: ReportUser,
    pub subscription: Option<ReportSubscription>,
    pub usage: UsageTotals,
    pub detailed_usage: Vec<DetailedUsageEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_users: u64,
    pub active_users: u64,
    pub trial_users: u64,
    pub total_listings: i64,
    pub total_ai_analyses: i64,
    pub total_api_calls: i64,
    pub plan_distribution: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureUsageReport {
    pub period: ReportPeriod,
    pub aggregate_stats: AggregateStats,
    pub user_reports: Vec<UserUsageReport>,
}

fn aggregate(reports: &[UserUsageReport]) -> AggregateStats {
    let mut stats = AggregateStats {
        total_users: reports.len() as u64,
        plan_distribution: PlanId::ALL
            .into_iter()
            .map(|plan| (plan.as_str().to_string(), 0))
            .collect(),
        ..Default::default()
    };
    for report in reports {
        stats.total_listings += report.usage.listings_created;
        stats.total_ai_analyses += report.usage.ai_analyses_used;
        stats.total_api_calls += report.usage.api_calls_made;
        if let Some(sub) = &report.subscription {
            match sub.status {
                listwise_shared::SubscriptionStatus::Active => stats.active_users += 1,
                listwise_shared::SubscriptionStatus::Trialing => stats.trial_users += 1,
                _ => {}
            }
            *stats
                .plan_distribution
                .entry(sub.plan.as_str().to_string())
                .or_default() += 1;
        }
    }
    stats
}

#[derive(Clone)]
pub struct AnalyticsService {
    users: Arc<dyn UserRepository>,
    subscriptions: SubscriptionStore,
    ledger: UsageLedger,
    catalog: Arc<PlanCatalog>,
    timeouts: CallTimeouts,
}

impl AnalyticsService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        subscriptions: SubscriptionStore,
        ledger: UsageLedger,
        catalog: Arc<PlanCatalog>,
        timeouts: CallTimeouts,
    ) -> Self {
        Self {
            users,
            subscriptions,
            ledger,
            catalog,
            timeouts,
        }
    }

    pub async fn subscription_stats(&self) -> BillingResult<SubscriptionStats> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.subscriptions.list(PAGE_SIZE, offset).await?;
            let len = page.len() as i64;
            all.extend(page);
            if len < PAGE_SIZE {
                break;
            }
            offset += len;
        }
        Ok(subscription_stats(&all, &self.catalog))
    }

    pub async fn usage_analytics(&self, days: u32, now: OffsetDateTime) -> BillingResult<UsageAnalytics> {
        let period = ReportPeriod::ending_at(days, now);
        let events = self.ledger.events_since(period.start_date).await?;
        Ok(UsageAnalytics {
            period,
            summary: summarize_events(&events),
        })
    }

    /// Per-user subscription, current-period usage and detailed events for the
    /// last `days` days.
    pub async fn feature_usage_report(
        &self,
        days: u32,
        now: OffsetDateTime,
    ) -> BillingResult<FeatureUsageReport> {
        let period = ReportPeriod::ending_at(days, now);
        let users = retry_read(self.timeouts.store, "user.list", || async move {
            self.users
                .list(REPORT_USER_LIMIT, 0)
                .await
                .map_err(BillingError::from)
        })
        .await?;

        let mut user_reports = Vec::with_capacity(users.len());
        for user in &users {
            let subscription = self.subscriptions.get_by_user_id(user.id).await?;
            let usage = self
                .ledger
                .find_current(user.id, now)
                .await?
                .map(|r| UsageTotals {
                    listings_created: r.listings_created,
                    ai_analyses_used: r.ai_analyses_used,
                    api_calls_made: r.api_calls_made,
                })
                .unwrap_or_default();
            let detailed_usage = self
                .ledger
                .events_for_user_since(user.id, period.start_date)
                .await?;

            user_reports.push(UserUsageReport {
                user: ReportUser::from(user),
                subscription: subscription.map(|sub| ReportSubscription {
                    plan: sub.plan,
                    status: sub.status,
                    plan_details: self.catalog.get(sub.plan).ok().cloned(),
                }),
                usage,
                detailed_usage,
            });
        }

        tracing::debug!(users = user_reports.len(), days = days, "Built feature usage report");
        Ok(FeatureUsageReport {
            period,
            aggregate_stats: aggregate(&user_reports),
            user_reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listwise_shared::SubscriptionStatus;

    fn sub(plan: PlanId, status: SubscriptionStatus) -> Subscription {
        let now = OffsetDateTime::now_utc();
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

    fn event(user_id: Uuid, kind: &str, plan: PlanId, metadata: serde_json::Value) -> DetailedUsageEvent {
        DetailedUsageEvent {
            id: Uuid::new_v4(),
            user_id,
            event_type: kind.to_string(),
            metadata,
            timestamp: OffsetDateTime::now_utc(),
            subscription_plan: plan,
        }
    }

    #[test]
    fn test_revenue_counts_only_active_and_trialing() {
        let subs = vec![
            sub(PlanId::Basic, SubscriptionStatus::Active),
            sub(PlanId::Pro, SubscriptionStatus::Trialing),
            sub(PlanId::Enterprise, SubscriptionStatus::Cancelled),
            sub(PlanId::Enterprise, SubscriptionStatus::PastDue),
        ];
        let stats = subscription_stats(&subs, &PlanCatalog::standard());
        assert_eq!(stats.total_subscriptions, 4);
        assert_eq!(stats.monthly_revenue_cents, 2900 + 6700);
        assert_eq!(stats.plan_breakdown.get("enterprise"), Some(&2));
        assert_eq!(stats.status_breakdown.get("past_due"), Some(&1));
    }

    #[test]
    fn test_summarize_events() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let events = vec![
            event(a, "listings", PlanId::Basic, serde_json::json!({"count": 3})),
            event(a, "aiAnalysis", PlanId::Basic, serde_json::json!({})),
            event(b, "listings", PlanId::Pro, serde_json::json!({})),
            event(b, "advancedAnalytics", PlanId::Pro, serde_json::json!({})),
        ];
        let summary = summarize_events(&events);
        assert_eq!(summary.total_listings, 4);
        assert_eq!(summary.total_ai_analyses, 1);
        assert_eq!(summary.total_api_calls, 0);
        assert_eq!(summary.unique_users, 2);
        assert_eq!(
            summary.plan_breakdown.get("basic"),
            Some(&PlanUsage { users: 1, usage: 4 })
        );
        assert_eq!(summary.by_type.get("advancedAnalytics"), Some(&1));
    }

    #[tokio::test]
    async fn test_feature_usage_report_covers_users_without_usage() {
        let store = listwise_shared::Datastore::in_memory();
        let timeouts = CallTimeouts::default();
        let subscriptions = SubscriptionStore::new(store.subscriptions.clone(), timeouts);
        let ledger = UsageLedger::new(store.usage.clone(), store.usage_events.clone(), timeouts);
        let service = AnalyticsService::new(
            store.users.clone(),
            subscriptions.clone(),
            ledger.clone(),
            Arc::new(PlanCatalog::standard()),
            timeouts,
        );

        let now = OffsetDateTime::now_utc();
        for email in ["a@example.com", "b@example.com"] {
            let user = User {
                id: Uuid::new_v4(),
                email: email.to_string(),
                password_hash: String::new(),
                first_name: "A".to_string(),
                last_name: "B".to_string(),
                billing_customer_ref: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            store.users.insert(&user).await.unwrap();
            if email.starts_with('a') {
                let mut s = sub(PlanId::Pro, SubscriptionStatus::Active);
                s.user_id = user.id;
                subscriptions.create(s.clone()).await.unwrap();
                ledger
                    .increment(user.id, s.id, "listings", 2, now)
                    .await
                    .unwrap();
            }
        }

        let report = service.feature_usage_report(30, now).await.unwrap();
        assert_eq!(report.aggregate_stats.total_users, 2);
        assert_eq!(report.aggregate_stats.active_users, 1);
        assert_eq!(report.aggregate_stats.total_listings, 2);
        assert_eq!(report.aggregate_stats.plan_distribution.get("pro"), Some(&1));
        assert_eq!(report.aggregate_stats.plan_distribution.get("basic"), Some(&0));
    }
}
