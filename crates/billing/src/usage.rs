//! Usage ledger
//!
//! One record per user per UTC calendar month, created lazily on first use.
//! Counters only grow and are incremented with the store's atomic primitive.
//! The detailed event log next to it is append-only and feeds analytics.

use std::collections::HashMap;
use std::sync::Arc;

use listwise_shared::{
    DetailedUsageEvent, PlanId, UsageCounter, UsageEventRepository, UsageRecord, UsageRepository,
};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::Feature;
use crate::timeout::{bounded, retry_read, CallTimeouts};

/// Metered action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageType {
    Listings,
    AiAnalysis,
    ApiCalls,
}

impl UsageType {
    pub const ALL: [UsageType; 3] = [UsageType::Listings, UsageType::AiAnalysis, UsageType::ApiCalls];

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::Listings => "listings",
            UsageType::AiAnalysis => "aiAnalysis",
            UsageType::ApiCalls => "apiCalls",
        }
    }

    pub fn counter(&self) -> UsageCounter {
        match self {
            UsageType::Listings => UsageCounter::ListingsCreated,
            UsageType::AiAnalysis => UsageCounter::AiAnalysesUsed,
            UsageType::ApiCalls => UsageCounter::ApiCallsMade,
        }
    }

    /// Plan capability capping this usage type. API calls are uncapped.
    pub fn limit_feature(&self) -> Option<Feature> {
        match self {
            UsageType::Listings => Some(Feature::MonthlyListingLimit),
            UsageType::AiAnalysis => Some(Feature::AiAnalysisLimit),
            UsageType::ApiCalls => None,
        }
    }
}

impl std::fmt::Display for UsageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UsageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UsageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown usage type: {}", s))
    }
}

/// Inclusive calendar-month window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsagePeriod {
    pub start: Date,
    pub end: Date,
}

impl UsagePeriod {
    /// First and last day of the UTC month containing `now`.
    pub fn containing(now: OffsetDateTime) -> Self {
        let day = now.to_offset(UtcOffset::UTC).date();
        Self::of_date(day)
    }

    fn of_date(day: Date) -> Self {
        let start = day - time::Duration::days(i64::from(day.day()) - 1);
        let days = time::util::days_in_year_month(start.year(), start.month());
        let end = start + time::Duration::days(i64::from(days) - 1);
        Self { start, end }
    }

    pub fn previous(&self) -> Option<Self> {
        self.start.previous_day().map(Self::of_date)
    }

    /// `YYYY-MM`
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.start.year(), u8::from(self.start.month()))
    }
}

/// Per-month counters for history views
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyUsage {
    pub period: String,
    pub listings_created: i64,
    pub ai_analyses_used: i64,
    pub api_calls_made: i64,
}

#[derive(Clone)]
pub struct UsageLedger {
    records: Arc<dyn UsageRepository>,
    events: Arc<dyn UsageEventRepository>,
    timeouts: CallTimeouts,
}

impl UsageLedger {
    pub fn new(
        records: Arc<dyn UsageRepository>,
        events: Arc<dyn UsageEventRepository>,
        timeouts: CallTimeouts,
    ) -> Self {
        Self {
            records,
            events,
            timeouts,
        }
    }

    pub fn current_period(now: OffsetDateTime) -> UsagePeriod {
        UsagePeriod::containing(now)
    }

    /// Record for the period containing `now`, without creating one.
    pub async fn find_current(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Option<UsageRecord>> {
        let period = UsagePeriod::containing(now);
        retry_read(self.timeouts.store, "usage.find_for_period", || async move {
            self.records
                .find_for_period(user_id, period.start, period.end)
                .await
                .map_err(BillingError::from)
        })
        .await
    }

    /// Existing record for the current period, or a freshly created zeroed one.
    /// Racing callers end up with the same record.
    pub async fn get_or_create(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<UsageRecord> {
        let period = UsagePeriod::containing(now);
        if let Some(record) = self.find_current(user_id, now).await? {
            return Ok(record);
        }

        let fresh = UsageRecord::empty(user_id, subscription_id, period.start, period.end, now);
        let stored = bounded(self.timeouts.store, "usage.insert_if_absent", async {
            self.records
                .insert_if_absent(&fresh)
                .await
                .map_err(BillingError::from)
        })
        .await?;

        if stored.id == fresh.id {
            tracing::info!(
                user_id = %user_id,
                period = %period.label(),
                "Opened usage record for new period"
            );
        }
        Ok(stored)
    }

    /// Add `amount` to the counter named by `usage_type`.
    ///
    /// Unknown usage types are logged and ignored (`Ok(None)`).
    pub async fn increment(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        usage_type: &str,
        amount: i64,
        now: OffsetDateTime,
    ) -> BillingResult<Option<UsageRecord>> {
        match usage_type.parse::<UsageType>() {
            Ok(kind) => self
                .increment_counter(user_id, subscription_id, kind, amount, now)
                .await
                .map(Some),
            Err(_) => {
                tracing::warn!(
                    user_id = %user_id,
                    usage_type = %usage_type,
                    "Ignoring increment for unknown usage type"
                );
                Ok(None)
            }
        }
    }

    pub async fn increment_counter(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        kind: UsageType,
        amount: i64,
        now: OffsetDateTime,
    ) -> BillingResult<UsageRecord> {
        if amount < 0 {
            return Err(BillingError::InvalidInput(format!(
                "usage amount must not be negative (got {})",
                amount
            )));
        }

        let record = self.get_or_create(user_id, subscription_id, now).await?;
        let updated = bounded(self.timeouts.store, "usage.add_to_counter", async {
            self.records
                .add_to_counter(record.id, kind.counter(), amount)
                .await
                .map_err(BillingError::from)
        })
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("usage record {}", record.id)))?;

        tracing::debug!(
            user_id = %user_id,
            usage_type = %kind,
            amount = amount,
            total = updated.counter(kind.counter()),
            "Recorded usage"
        );
        Ok(updated)
    }

    /// Counters for the last `months` months, oldest first. Months without a
    /// record report zeros.
    pub async fn usage_history(
        &self,
        user_id: Uuid,
        months: u32,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<MonthlyUsage>> {
        let limit = i64::from(months);
        let records = retry_read(self.timeouts.store, "usage.list_for_user", || async move {
            self.records
                .list_for_user(user_id, limit)
                .await
                .map_err(BillingError::from)
        })
        .await?;
        let by_start: HashMap<Date, UsageRecord> =
            records.into_iter().map(|r| (r.period_start, r)).collect();

        let mut periods = Vec::with_capacity(months as usize);
        let mut cursor = Some(UsagePeriod::containing(now));
        for _ in 0..months {
            let Some(period) = cursor else { break };
            periods.push(period);
            cursor = period.previous();
        }
        periods.reverse();

        Ok(periods
            .into_iter()
            .map(|period| {
                let record = by_start.get(&period.start);
                MonthlyUsage {
                    period: period.label(),
                    listings_created: record.map(|r| r.listings_created).unwrap_or(0),
                    ai_analyses_used: record.map(|r| r.ai_analyses_used).unwrap_or(0),
                    api_calls_made: record.map(|r| r.api_calls_made).unwrap_or(0),
                }
            })
            .collect())
    }

    /// Append a detailed usage event for analytics.
    pub async fn record_event(
        &self,
        user_id: Uuid,
        event_type: &str,
        metadata: serde_json::Value,
        plan: PlanId,
        now: OffsetDateTime,
    ) -> BillingResult<DetailedUsageEvent> {
        let event = DetailedUsageEvent {
            id: Uuid::new_v4(),
            user_id,
            event_type: event_type.to_string(),
            metadata,
            timestamp: now,
            subscription_plan: plan,
        };
        bounded(self.timeouts.store, "usage_events.append", async {
            self.events.append(&event).await.map_err(BillingError::from)
        })
        .await?;
        Ok(event)
    }

    pub async fn events_since(&self, since: OffsetDateTime) -> BillingResult<Vec<DetailedUsageEvent>> {
        retry_read(self.timeouts.store, "usage_events.list_since", || async move {
            self.events.list_since(since).await.map_err(BillingError::from)
        })
        .await
    }

    pub async fn events_for_user_since(
        &self,
        user_id: Uuid,
        since: OffsetDateTime,
    ) -> BillingResult<Vec<DetailedUsageEvent>> {
        retry_read(self.timeouts.store, "usage_events.list_for_user_since", || async move {
            self.events
                .list_for_user_since(user_id, since)
                .await
                .map_err(BillingError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listwise_shared::Datastore;
    use time::macros::{date, datetime};

    fn ledger() -> UsageLedger {
        let store = Datastore::in_memory();
        UsageLedger::new(store.usage, store.usage_events, CallTimeouts::default())
    }

    #[test]
    fn test_current_period_bounds() {
        let period = UsageLedger::current_period(datetime!(2024-02-15 10:30 UTC));
        assert_eq!(period.start, date!(2024 - 02 - 01));
        assert_eq!(period.end, date!(2024 - 02 - 29));

        let period = UsageLedger::current_period(datetime!(2023-12-31 23:59:59 UTC));
        assert_eq!(period.start, date!(2023 - 12 - 01));
        assert_eq!(period.end, date!(2023 - 12 - 31));
    }

    #[test]
    fn test_current_period_uses_utc() {
        // 23:30 on Jan 31 at -05:00 is already February in UTC.
        let now = datetime!(2024-01-31 23:30 -5);
        let period = UsageLedger::current_period(now);
        assert_eq!(period.start, date!(2024 - 02 - 01));
    }

    #[test]
    fn test_previous_period_crosses_year() {
        let jan = UsagePeriod::containing(datetime!(2024-01-10 0:00 UTC));
        let dec = jan.previous().unwrap();
        assert_eq!(dec.start, date!(2023 - 12 - 01));
        assert_eq!(dec.label(), "2023-12");
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let ledger = ledger();
        let (user, sub) = (Uuid::new_v4(), Uuid::new_v4());
        let now = datetime!(2024-03-10 12:00 UTC);
        let first = ledger.get_or_create(user, sub, now).await.unwrap();
        let second = ledger.get_or_create(user, sub, now).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.listings_created, 0);
    }

    #[tokio::test]
    async fn test_sequential_increments_accumulate() {
        let ledger = ledger();
        let (user, sub) = (Uuid::new_v4(), Uuid::new_v4());
        let now = datetime!(2024-03-10 12:00 UTC);
        for _ in 0..5 {
            ledger.increment(user, sub, "listings", 1, now).await.unwrap();
        }
        let record = ledger.get_or_create(user, sub, now).await.unwrap();
        assert_eq!(record.listings_created, 5);
        assert_eq!(record.ai_analyses_used, 0);
    }

    #[tokio::test]
    async fn test_unknown_usage_type_is_noop() {
        let ledger = ledger();
        let (user, sub) = (Uuid::new_v4(), Uuid::new_v4());
        let now = datetime!(2024-03-10 12:00 UTC);
        let result = ledger.increment(user, sub, "teleports", 3, now).await.unwrap();
        assert!(result.is_none());
        let record = ledger.get_or_create(user, sub, now).await.unwrap();
        assert_eq!(
            record.listings_created + record.ai_analyses_used + record.api_calls_made,
            0
        );
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let ledger = ledger();
        let err = ledger
            .increment(Uuid::new_v4(), Uuid::new_v4(), "apiCalls", -1, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_period_rollover_starts_from_zero() {
        let ledger = ledger();
        let (user, sub) = (Uuid::new_v4(), Uuid::new_v4());
        let march = datetime!(2024-03-31 23:59 UTC);
        let april = datetime!(2024-04-01 00:01 UTC);

        let old = ledger
            .increment(user, sub, "aiAnalysis", 7, march)
            .await
            .unwrap()
            .unwrap();
        let fresh = ledger.get_or_create(user, sub, april).await.unwrap();

        assert_ne!(old.id, fresh.id);
        assert_eq!(fresh.period_start, date!(2024 - 04 - 01));
        assert_eq!(fresh.ai_analyses_used, 0);
    }

    #[tokio::test]
    async fn test_usage_history_is_chronological_with_gaps() {
        let ledger = ledger();
        let (user, sub) = (Uuid::new_v4(), Uuid::new_v4());
        ledger
            .increment(user, sub, "listings", 4, datetime!(2024-01-05 0:00 UTC))
            .await
            .unwrap();
        ledger
            .increment(user, sub, "listings", 2, datetime!(2024-03-05 0:00 UTC))
            .await
            .unwrap();

        let history = ledger
            .usage_history(user, 3, datetime!(2024-03-20 0:00 UTC))
            .await
            .unwrap();
        let periods: Vec<&str> = history.iter().map(|m| m.period.as_str()).collect();
        assert_eq!(periods, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(history[0].listings_created, 4);
        assert_eq!(history[1].listings_created, 0);
        assert_eq!(history[2].listings_created, 2);
    }

    #[tokio::test]
    async fn test_record_event_is_listed() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        ledger
            .record_event(user, "listings", serde_json::json!({"count": 1}), PlanId::Basic, now)
            .await
            .unwrap();
        let events = ledger
            .events_for_user_since(user, now - time::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subscription_plan, PlanId::Basic);
    }

    #[test]
    fn test_usage_type_limits() {
        assert_eq!(
            UsageType::Listings.limit_feature(),
            Some(Feature::MonthlyListingLimit)
        );
        assert_eq!(UsageType::AiAnalysis.limit_feature(), Some(Feature::AiAnalysisLimit));
        assert_eq!(UsageType::ApiCalls.limit_feature(), None);
    }
}
