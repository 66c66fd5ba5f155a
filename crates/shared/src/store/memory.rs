//! In-process store
//!
//! Every operation takes a single mutex, which makes `insert_if_absent` and
//! `add_to_counter` atomic the same way the SQL statements are.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{StoreHealth, SubscriptionRepository, UsageEventRepository, UsageRepository, UserRepository};
use crate::error::{StoreError, StoreResult};
use crate::types::{
    DetailedUsageEvent, Subscription, SubscriptionPatch, UsageCounter, UsageRecord, User,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    subscriptions: HashMap<Uuid, Subscription>,
    usage: HashMap<Uuid, UsageRecord>,
    events: Vec<DetailedUsageEvent>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("in-memory store lock poisoned".to_string()))
    }
}

fn page<T: Clone>(items: Vec<&T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let taken = tables
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email));
        if taken || tables.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {}", user.email)));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>> {
        let tables = self.lock()?;
        let mut users: Vec<&User> = tables.users.values().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(users, limit, offset))
    }

    async fn set_active(&self, id: Uuid, active: bool, now: OffsetDateTime) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                user.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_billing_customer(
        &self,
        id: Uuid,
        customer_ref: &str,
        now: OffsetDateTime,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
        user.billing_customer_ref = Some(customer_ref.to_string());
        user.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn insert(&self, subscription: &Subscription) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if tables.subscriptions.contains_key(&subscription.id) {
            return Err(StoreError::Conflict(format!("subscription {}", subscription.id)));
        }
        tables
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Subscription>> {
        Ok(self.lock()?.subscriptions.get(&id).cloned())
    }

    async fn latest_for_user(&self, user_id: Uuid) -> StoreResult<Option<Subscription>> {
        Ok(self
            .lock()?
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn find_by_billing_ref(&self, external_id: &str) -> StoreResult<Option<Subscription>> {
        Ok(self
            .lock()?
            .subscriptions
            .values()
            .filter(|s| s.billing_subscription_ref.as_deref() == Some(external_id))
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &SubscriptionPatch,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Subscription>> {
        let mut tables = self.lock()?;
        Ok(tables.subscriptions.get_mut(&id).map(|sub| {
            patch.apply(sub, now);
            sub.clone()
        }))
    }

    async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<Subscription>> {
        let tables = self.lock()?;
        let mut subs: Vec<&Subscription> = tables.subscriptions.values().collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(subs, limit, offset))
    }
}

#[async_trait]
impl UsageRepository for MemoryStore {
    async fn find_for_period(
        &self,
        user_id: Uuid,
        period_start: Date,
        period_end: Date,
    ) -> StoreResult<Option<UsageRecord>> {
        Ok(self
            .lock()?
            .usage
            .values()
            .find(|r| {
                r.user_id == user_id && r.period_start == period_start && r.period_end == period_end
            })
            .cloned())
    }

    async fn insert_if_absent(&self, record: &UsageRecord) -> StoreResult<UsageRecord> {
        let mut tables = self.lock()?;
        let existing = tables.usage.values().find(|r| {
            r.user_id == record.user_id
                && r.period_start == record.period_start
                && r.period_end == record.period_end
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        tables.usage.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn add_to_counter(
        &self,
        record_id: Uuid,
        counter: UsageCounter,
        amount: i64,
    ) -> StoreResult<Option<UsageRecord>> {
        let mut tables = self.lock()?;
        let Some(record) = tables.usage.get_mut(&record_id) else {
            return Ok(None);
        };
        let slot = record.counter_mut(counter);
        *slot = slot.checked_add(amount).ok_or_else(|| {
            tracing::error!(record_id = %record_id, amount = amount, "Usage counter overflow");
            StoreError::Database(format!("usage counter overflow on record {}", record_id))
        })?;
        Ok(Some(record.clone()))
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> StoreResult<Vec<UsageRecord>> {
        let tables = self.lock()?;
        let mut records: Vec<&UsageRecord> =
            tables.usage.values().filter(|r| r.user_id == user_id).collect();
        records.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        Ok(page(records, limit, 0))
    }
}

#[async_trait]
impl UsageEventRepository for MemoryStore {
    async fn append(&self, event: &DetailedUsageEvent) -> StoreResult<()> {
        self.lock()?.events.push(event.clone());
        Ok(())
    }

    async fn list_since(&self, since: OffsetDateTime) -> StoreResult<Vec<DetailedUsageEvent>> {
        let mut events: Vec<DetailedUsageEvent> = self
            .lock()?
            .events
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn list_for_user_since(
        &self,
        user_id: Uuid,
        since: OffsetDateTime,
    ) -> StoreResult<Vec<DetailedUsageEvent>> {
        let mut events = self.list_since(since).await?;
        events.retain(|e| e.user_id == user_id);
        Ok(events)
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}
