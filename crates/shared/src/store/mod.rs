//! Repository layer
//!
//! The billing engine and the API only see these traits. Two backends honour
//! the same contract: [`postgres`] for deployments and [`memory`] for local
//! runs without a database and for tests.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{
    DetailedUsageEvent, Subscription, SubscriptionPatch, UsageCounter, UsageRecord, User,
};

pub mod memory;
pub mod postgres;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user. Fails with `Conflict` when the email is taken.
    async fn insert(&self, user: &User) -> StoreResult<()>;
    async fn get(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>>;
    /// Returns false when no user has this id.
    async fn set_active(&self, id: Uuid, active: bool, now: OffsetDateTime) -> StoreResult<bool>;
    async fn set_billing_customer(
        &self,
        id: Uuid,
        customer_ref: &str,
        now: OffsetDateTime,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert(&self, subscription: &Subscription) -> StoreResult<()>;
    async fn get(&self, id: Uuid) -> StoreResult<Option<Subscription>>;
    /// Most recently created subscription for the user.
    async fn latest_for_user(&self, user_id: Uuid) -> StoreResult<Option<Subscription>>;
    async fn find_by_billing_ref(&self, external_id: &str) -> StoreResult<Option<Subscription>>;
    /// Apply `patch` and stamp `updated_at = now`. `None` when the id is unknown,
    /// in which case nothing is written.
    async fn update(
        &self,
        id: Uuid,
        patch: &SubscriptionPatch,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Subscription>>;
    async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<Subscription>>;
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn find_for_period(
        &self,
        user_id: Uuid,
        period_start: Date,
        period_end: Date,
    ) -> StoreResult<Option<UsageRecord>>;
    /// Insert `record` unless one already exists for its
    /// `(user_id, period_start, period_end)`. Returns whichever record is
    /// stored afterwards, so concurrent callers converge on one row.
    async fn insert_if_absent(&self, record: &UsageRecord) -> StoreResult<UsageRecord>;
    /// Atomically add `amount` to one counter and return the updated record.
    async fn add_to_counter(
        &self,
        record_id: Uuid,
        counter: UsageCounter,
        amount: i64,
    ) -> StoreResult<Option<UsageRecord>>;
    /// Records for the user, newest period first.
    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> StoreResult<Vec<UsageRecord>>;
}

#[async_trait]
pub trait UsageEventRepository: Send + Sync {
    async fn append(&self, event: &DetailedUsageEvent) -> StoreResult<()>;
    /// Events at or after `since`, oldest first.
    async fn list_since(&self, since: OffsetDateTime) -> StoreResult<Vec<DetailedUsageEvent>>;
    async fn list_for_user_since(
        &self,
        user_id: Uuid,
        since: OffsetDateTime,
    ) -> StoreResult<Vec<DetailedUsageEvent>>;
}

#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;
}

/// Bundle of repositories handed to the services at startup
#[derive(Clone)]
pub struct Datastore {
    pub users: Arc<dyn UserRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub usage: Arc<dyn UsageRepository>,
    pub usage_events: Arc<dyn UsageEventRepository>,
    pub health: Arc<dyn StoreHealth>,
}

impl Datastore {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(postgres::PgStore::new(pool));
        Self {
            users: store.clone(),
            subscriptions: store.clone(),
            usage: store.clone(),
            usage_events: store.clone(),
            health: store,
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(memory::MemoryStore::default());
        Self {
            users: store.clone(),
            subscriptions: store.clone(),
            usage: store.clone(),
            usage_events: store.clone(),
            health: store,
        }
    }
}
