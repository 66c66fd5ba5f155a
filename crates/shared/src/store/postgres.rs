//! PostgreSQL store
//!
//! Counters are incremented server-side (`col = col + $n`) and period records
//! are created with `ON CONFLICT DO NOTHING` against the
//! `(user_id, period_start, period_end)` unique index.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{StoreHealth, SubscriptionRepository, UsageEventRepository, UsageRepository, UserRepository};
use crate::error::{StoreError, StoreResult};
use crate::types::{
    DetailedUsageEvent, PlanId, Subscription, SubscriptionPatch, SubscriptionStatus, UsageCounter,
    UsageRecord, User,
};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, billing_account_ref, billing_subscription_ref, \
     plan, status, current_period_start, current_period_end, cancel_at_period_end, created_at, updated_at";

const USAGE_COLUMNS: &str = "id, user_id, subscription_id, period_start, period_end, \
     listings_created, ai_analyses_used, api_calls_made, created_at";

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, billing_customer_ref, \
     is_active, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// A stored value outside the known set. Logged here so the row id reaches
/// the operator even when callers only see a generic upstream error.
fn corrupt(table: &str, id: Uuid, detail: impl std::fmt::Display) -> StoreError {
    tracing::error!(table = table, id = %id, error = %detail, "Unreadable row in store");
    StoreError::Corrupt(format!("{} {}: {}", table, id, detail))
}

#[derive(FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    billing_account_ref: Option<String>,
    billing_subscription_ref: Option<String>,
    plan: String,
    status: String,
    current_period_start: OffsetDateTime,
    current_period_end: OffsetDateTime,
    cancel_at_period_end: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let plan = row
            .plan
            .parse::<PlanId>()
            .map_err(|e| corrupt("subscription", row.id, e))?;
        let status = row
            .status
            .parse::<SubscriptionStatus>()
            .map_err(|e| corrupt("subscription", row.id, e))?;
        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            billing_account_ref: row.billing_account_ref,
            billing_subscription_ref: row.billing_subscription_ref,
            plan,
            status,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            cancel_at_period_end: row.cancel_at_period_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all(rows: Vec<SubscriptionRow>) -> StoreResult<Vec<Subscription>> {
    rows.into_iter().map(Subscription::try_from).collect()
}

#[derive(FromRow)]
struct UsageRow {
    id: Uuid,
    user_id: Uuid,
    subscription_id: Uuid,
    period_start: Date,
    period_end: Date,
    listings_created: i64,
    ai_analyses_used: i64,
    api_calls_made: i64,
    created_at: OffsetDateTime,
}

impl From<UsageRow> for UsageRecord {
    fn from(row: UsageRow) -> Self {
        UsageRecord {
            id: row.id,
            user_id: row.user_id,
            subscription_id: row.subscription_id,
            period_start: row.period_start,
            period_end: row.period_end,
            listings_created: row.listings_created,
            ai_analyses_used: row.ai_analyses_used,
            api_calls_made: row.api_calls_made,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    billing_customer_ref: Option<String>,
    is_active: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            billing_customer_ref: row.billing_customer_ref,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct UsageEventRow {
    id: Uuid,
    user_id: Uuid,
    event_type: String,
    metadata: serde_json::Value,
    occurred_at: OffsetDateTime,
    subscription_plan: String,
}

impl TryFrom<UsageEventRow> for DetailedUsageEvent {
    type Error = StoreError;

    fn try_from(row: UsageEventRow) -> Result<Self, Self::Error> {
        let subscription_plan = row
            .subscription_plan
            .parse::<PlanId>()
            .map_err(|e| corrupt("usage event", row.id, e))?;
        Ok(DetailedUsageEvent {
            id: row.id,
            user_id: row.user_id,
            event_type: row.event_type,
            metadata: row.metadata,
            timestamp: row.occurred_at,
            subscription_plan,
        })
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn insert(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, password_hash, first_name, last_name, billing_customer_ref,
                is_active, created_at, updated_at
            ) VALUES ($1, LOWER($2), $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.billing_customer_ref)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE email = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            USER_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn set_active(&self, id: Uuid, active: bool, now: OffsetDateTime) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET is_active = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(active)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_billing_customer(
        &self,
        id: Uuid,
        customer_ref: &str,
        now: OffsetDateTime,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET billing_customer_ref = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(customer_ref)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for PgStore {
    async fn insert(&self, subscription: &Subscription) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, billing_account_ref, billing_subscription_ref, plan, status,
                current_period_start, current_period_end, cancel_at_period_end,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(&subscription.billing_account_ref)
        .bind(&subscription.billing_subscription_ref)
        .bind(subscription.plan.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn latest_for_user(&self, user_id: Uuid) -> StoreResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_billing_ref(&self, external_id: &str) -> StoreResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE billing_subscription_ref = $1 \
             ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &SubscriptionPatch,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions SET
                plan = COALESCE($2, plan),
                status = COALESCE($3, status),
                billing_subscription_ref = COALESCE($4, billing_subscription_ref),
                current_period_start = COALESCE($5, current_period_start),
                current_period_end = COALESCE($6, current_period_end),
                cancel_at_period_end = COALESCE($7, cancel_at_period_end),
                updated_at = $8
            WHERE id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id)
        .bind(patch.plan.map(|p| p.as_str()))
        .bind(patch.status.map(|s| s.as_str()))
        .bind(&patch.billing_subscription_ref)
        .bind(patch.current_period_start)
        .bind(patch.current_period_end)
        .bind(patch.cancel_at_period_end)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl UsageRepository for PgStore {
    async fn find_for_period(
        &self,
        user_id: Uuid,
        period_start: Date,
        period_end: Date,
    ) -> StoreResult<Option<UsageRecord>> {
        let row: Option<UsageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM usage_records \
             WHERE user_id = $1 AND period_start = $2 AND period_end = $3",
            USAGE_COLUMNS
        ))
        .bind(user_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UsageRecord::from))
    }

    async fn insert_if_absent(&self, record: &UsageRecord) -> StoreResult<UsageRecord> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (
                id, user_id, subscription_id, period_start, period_end,
                listings_created, ai_analyses_used, api_calls_made, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, period_start, period_end) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.subscription_id)
        .bind(record.period_start)
        .bind(record.period_end)
        .bind(record.listings_created)
        .bind(record.ai_analyses_used)
        .bind(record.api_calls_made)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        self.find_for_period(record.user_id, record.period_start, record.period_end)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "usage record for user {} ({} - {})",
                    record.user_id, record.period_start, record.period_end
                ))
            })
    }

    async fn add_to_counter(
        &self,
        record_id: Uuid,
        counter: UsageCounter,
        amount: i64,
    ) -> StoreResult<Option<UsageRecord>> {
        // Column name comes from a closed enum, never from input.
        let column = counter.column();
        let row: Option<UsageRow> = sqlx::query_as(&format!(
            "UPDATE usage_records SET {col} = {col} + $2 WHERE id = $1 RETURNING {cols}",
            col = column,
            cols = USAGE_COLUMNS
        ))
        .bind(record_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UsageRecord::from))
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> StoreResult<Vec<UsageRecord>> {
        let rows: Vec<UsageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM usage_records WHERE user_id = $1 ORDER BY period_start DESC LIMIT $2",
            USAGE_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UsageRecord::from).collect())
    }
}

#[async_trait]
impl UsageEventRepository for PgStore {
    async fn append(&self, event: &DetailedUsageEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_events (id, user_id, event_type, metadata, occurred_at, subscription_plan)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(&event.event_type)
        .bind(&event.metadata)
        .bind(event.timestamp)
        .bind(event.subscription_plan.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_since(&self, since: OffsetDateTime) -> StoreResult<Vec<DetailedUsageEvent>> {
        let rows: Vec<UsageEventRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, event_type, metadata, occurred_at, subscription_plan
            FROM usage_events
            WHERE occurred_at >= $1
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DetailedUsageEvent::try_from).collect()
    }

    async fn list_for_user_since(
        &self,
        user_id: Uuid,
        since: OffsetDateTime,
    ) -> StoreResult<Vec<DetailedUsageEvent>> {
        let rows: Vec<UsageEventRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, event_type, metadata, occurred_at, subscription_plan
            FROM usage_events
            WHERE user_id = $1 AND occurred_at >= $2
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DetailedUsageEvent::try_from).collect()
    }
}

#[async_trait]
impl StoreHealth for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
