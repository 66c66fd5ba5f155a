//! Subscription record store
//!
//! Thin service over the subscription repository: deadlines, a single retry on
//! idempotent reads and structured logging of every write.

use std::sync::Arc;

use listwise_shared::{Subscription, SubscriptionPatch, SubscriptionRepository};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::timeout::{bounded, retry_read, CallTimeouts};

#[derive(Clone)]
pub struct SubscriptionStore {
    repo: Arc<dyn SubscriptionRepository>,
    timeouts: CallTimeouts,
}

impl SubscriptionStore {
    pub fn new(repo: Arc<dyn SubscriptionRepository>, timeouts: CallTimeouts) -> Self {
        Self { repo, timeouts }
    }

    pub async fn create(&self, subscription: Subscription) -> BillingResult<Subscription> {
        bounded(self.timeouts.store, "subscription.create", async {
            self.repo.insert(&subscription).await.map_err(BillingError::from)
        })
        .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            plan = %subscription.plan,
            status = %subscription.status,
            "Created subscription record"
        );
        Ok(subscription)
    }

    pub async fn get_by_id(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        retry_read(self.timeouts.store, "subscription.get", || async move {
            self.repo.get(id).await.map_err(BillingError::from)
        })
        .await
    }

    /// Most recently created subscription for the user.
    pub async fn get_by_user_id(&self, user_id: Uuid) -> BillingResult<Option<Subscription>> {
        retry_read(self.timeouts.store, "subscription.latest_for_user", || async move {
            self.repo
                .latest_for_user(user_id)
                .await
                .map_err(BillingError::from)
        })
        .await
    }

    pub async fn find_by_billing_ref(&self, external_id: &str) -> BillingResult<Option<Subscription>> {
        retry_read(self.timeouts.store, "subscription.find_by_billing_ref", || async move {
            self.repo
                .find_by_billing_ref(external_id)
                .await
                .map_err(BillingError::from)
        })
        .await
    }

    pub async fn list(&self, limit: i64, offset: i64) -> BillingResult<Vec<Subscription>> {
        retry_read(self.timeouts.store, "subscription.list", || async move {
            self.repo.list(limit, offset).await.map_err(BillingError::from)
        })
        .await
    }

    /// Apply `patch`; `updated_at` is set to the time of the call.
    /// Concurrent updates are last-writer-wins.
    pub async fn update(&self, id: Uuid, patch: SubscriptionPatch) -> BillingResult<Subscription> {
        let now = OffsetDateTime::now_utc();
        let updated = bounded(self.timeouts.store, "subscription.update", async {
            self.repo.update(id, &patch, now).await.map_err(BillingError::from)
        })
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("subscription {}", id)))?;

        tracing::info!(
            subscription_id = %id,
            plan = %updated.plan,
            status = %updated.status,
            cancel_at_period_end = updated.cancel_at_period_end,
            "Updated subscription record"
        );
        Ok(updated)
    }
}
