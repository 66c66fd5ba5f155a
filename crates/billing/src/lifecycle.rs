//! Subscription lifecycle
//!
//! Orchestrates the billing gateway and the local subscription record. The
//! external call always happens first; the local record only changes once
//! the billing service has accepted the change.

use std::sync::Arc;

use listwise_shared::{
    PlanId, Subscription, SubscriptionPatch, SubscriptionStatus, User, UserRepository,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::BillingGateway;
use crate::subscriptions::SubscriptionStore;
use crate::timeout::{bounded, CallTimeouts};

/// Default trial length for new sign-ups
pub const DEFAULT_TRIAL_DAYS: u32 = 7;

#[derive(Clone)]
pub struct SubscriptionService {
    users: Arc<dyn UserRepository>,
    subscriptions: SubscriptionStore,
    gateway: Arc<dyn BillingGateway>,
    timeouts: CallTimeouts,
}

impl SubscriptionService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        subscriptions: SubscriptionStore,
        gateway: Arc<dyn BillingGateway>,
        timeouts: CallTimeouts,
    ) -> Self {
        Self {
            users,
            subscriptions,
            gateway,
            timeouts,
        }
    }

    async fn current(&self, user_id: Uuid) -> BillingResult<Subscription> {
        self.subscriptions
            .get_by_user_id(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Subscription not found".to_string()))
    }

    fn external_ref(subscription: &Subscription) -> BillingResult<&str> {
        subscription
            .billing_subscription_ref
            .as_deref()
            .ok_or_else(|| {
                BillingError::Config(format!(
                    "subscription {} has no billing reference",
                    subscription.id
                ))
            })
    }

    /// Create the billing customer (if missing) and a trial subscription, then
    /// store the local record with the billing service's period bounds.
    pub async fn start_trial(
        &self,
        user: &User,
        plan: PlanId,
        trial_days: u32,
    ) -> BillingResult<Subscription> {
        let customer_id = match &user.billing_customer_ref {
            Some(existing) => existing.clone(),
            None => {
                let name = format!("{} {}", user.first_name, user.last_name);
                let created = bounded(self.timeouts.billing, "billing.create_customer", async {
                    self.gateway.create_customer(user.id, &user.email, &name).await
                })
                .await?;
                let now = OffsetDateTime::now_utc();
                bounded(self.timeouts.store, "user.set_billing_customer", async {
                    self.users
                        .set_billing_customer(user.id, &created, now)
                        .await
                        .map_err(BillingError::from)
                })
                .await?;
                created
            }
        };

        let external = bounded(self.timeouts.billing, "billing.create_subscription", async {
            self.gateway
                .create_subscription(&customer_id, plan, trial_days)
                .await
        })
        .await?;

        let now = OffsetDateTime::now_utc();
        let status = if trial_days > 0 {
            SubscriptionStatus::Trialing
        } else {
            external.status
        };
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: user.id,
            billing_account_ref: Some(customer_id),
            billing_subscription_ref: Some(external.id),
            plan,
            status,
            current_period_start: external.current_period_start,
            current_period_end: external.current_period_end,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };
        let stored = self.subscriptions.create(subscription).await?;

        tracing::info!(
            user_id = %user.id,
            subscription_id = %stored.id,
            plan = %plan,
            trial_days = trial_days,
            "Started subscription trial"
        );
        Ok(stored)
    }

    /// Move the user's current subscription to `new_plan`, prorated on the
    /// billing side.
    pub async fn change_plan(&self, user_id: Uuid, new_plan: PlanId) -> BillingResult<Subscription> {
        let current = self.current(user_id).await?;
        if current.plan == new_plan {
            return Ok(current);
        }
        let external_id = Self::external_ref(&current)?;

        bounded(self.timeouts.billing, "billing.change_plan", async {
            self.gateway.change_plan(external_id, new_plan).await
        })
        .await?;

        let updated = self
            .subscriptions
            .update(
                current.id,
                SubscriptionPatch {
                    plan: Some(new_plan),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            from = %current.plan,
            to = %new_plan,
            "Changed subscription plan"
        );
        Ok(updated)
    }

    /// `immediate` ends the subscription now; otherwise it runs to the end of
    /// the paid period.
    pub async fn cancel(&self, user_id: Uuid, immediate: bool) -> BillingResult<Subscription> {
        let current = self.current(user_id).await?;
        let external_id = Self::external_ref(&current)?;

        bounded(self.timeouts.billing, "billing.cancel", async {
            self.gateway.cancel(external_id, !immediate).await
        })
        .await?;

        let patch = if immediate {
            SubscriptionPatch {
                status: Some(SubscriptionStatus::Cancelled),
                ..Default::default()
            }
        } else {
            SubscriptionPatch {
                cancel_at_period_end: Some(true),
                ..Default::default()
            }
        };
        let updated = self.subscriptions.update(current.id, patch).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %updated.id,
            immediate = immediate,
            "Cancelled subscription"
        );
        Ok(updated)
    }

    /// URL of a billing-portal session for the user's billing customer.
    pub async fn billing_portal(&self, user_id: Uuid, return_url: &str) -> BillingResult<String> {
        let user = bounded(self.timeouts.store, "user.get", async {
            self.users.get(user_id).await.map_err(BillingError::from)
        })
        .await?
        .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;

        let customer_id = match user.billing_customer_ref {
            Some(customer) => customer,
            None => self
                .subscriptions
                .get_by_user_id(user_id)
                .await?
                .and_then(|sub| sub.billing_account_ref)
                .ok_or_else(|| BillingError::NotFound("Customer not found".to_string()))?,
        };

        let url = bounded(self.timeouts.billing, "billing.create_portal_session", async {
            self.gateway.create_portal_session(&customer_id, return_url).await
        })
        .await?;

        tracing::info!(user_id = %user_id, "Opened billing portal session");
        Ok(url)
    }

    /// Local-only correction of plan and/or status. The billing service is not
    /// told.
    pub async fn admin_override(
        &self,
        user_id: Uuid,
        plan: Option<PlanId>,
        status: Option<SubscriptionStatus>,
    ) -> BillingResult<Subscription> {
        let current = self.current(user_id).await?;
        let patch = SubscriptionPatch {
            plan,
            status,
            ..Default::default()
        };
        if patch.is_empty() {
            return Err(BillingError::InvalidInput(
                "plan or status required".to_string(),
            ));
        }

        let updated = self.subscriptions.update(current.id, patch).await?;
        tracing::warn!(
            user_id = %user_id,
            plan = %updated.plan,
            status = %updated.status,
            "Admin override applied to subscription"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::OfflineGateway;
    use listwise_shared::Datastore;

    struct Fixture {
        service: SubscriptionService,
        gateway: Arc<OfflineGateway>,
        store: Datastore,
    }

    fn fixture() -> Fixture {
        let store = Datastore::in_memory();
        let gateway = Arc::new(OfflineGateway::new());
        let service = SubscriptionService::new(
            store.users.clone(),
            SubscriptionStore::new(store.subscriptions.clone(), CallTimeouts::default()),
            gateway.clone(),
            CallTimeouts::default(),
        );
        Fixture {
            service,
            gateway,
            store,
        }
    }

    async fn user(store: &Datastore) -> User {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4().simple()),
            password_hash: "hash".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            billing_customer_ref: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.users.insert(&user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn test_start_trial_links_customer_and_subscription() {
        let f = fixture();
        let user = user(&f.store).await;

        let sub = f.service.start_trial(&user, PlanId::Pro, 7).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert_eq!(sub.plan, PlanId::Pro);

        let reloaded = f.store.users.get(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.billing_customer_ref, sub.billing_account_ref);

        let external = f
            .gateway
            .fetch_subscription(sub.billing_subscription_ref.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(external.current_period_end, sub.current_period_end);
    }

    #[tokio::test]
    async fn test_change_plan_updates_both_sides() {
        let f = fixture();
        let user = user(&f.store).await;
        let sub = f.service.start_trial(&user, PlanId::Basic, 7).await.unwrap();

        let updated = f.service.change_plan(user.id, PlanId::Enterprise).await.unwrap();
        assert_eq!(updated.plan, PlanId::Enterprise);
        let external = f
            .gateway
            .fetch_subscription(sub.billing_subscription_ref.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(external.plan, Some(PlanId::Enterprise));
    }

    #[tokio::test]
    async fn test_cancel_at_period_end_keeps_status() {
        let f = fixture();
        let user = user(&f.store).await;
        f.service.start_trial(&user, PlanId::Basic, 7).await.unwrap();

        let updated = f.service.cancel(user.id, false).await.unwrap();
        assert!(updated.cancel_at_period_end);
        assert_eq!(updated.status, SubscriptionStatus::Trialing);
    }

    #[tokio::test]
    async fn test_cancel_immediately() {
        let f = fixture();
        let user = user(&f.store).await;
        f.service.start_trial(&user, PlanId::Basic, 7).await.unwrap();

        let updated = f.service.cancel(user.id, true).await.unwrap();
        assert_eq!(updated.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_change_plan_without_subscription_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .change_plan(Uuid::new_v4(), PlanId::Pro)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_billing_portal_needs_a_customer() {
        let f = fixture();
        let user = user(&f.store).await;

        let err = f
            .service
            .billing_portal(user.id, "https://app.listwise.test/account")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));

        f.service.start_trial(&user, PlanId::Basic, 7).await.unwrap();
        let url = f
            .service
            .billing_portal(user.id, "https://app.listwise.test/account")
            .await
            .unwrap();
        assert!(url.starts_with("https://app.listwise.test/account?portal_session="));
    }

    #[tokio::test]
    async fn test_admin_override_is_local_only() {
        let f = fixture();
        let user = user(&f.store).await;
        let sub = f.service.start_trial(&user, PlanId::Basic, 7).await.unwrap();

        let updated = f
            .service
            .admin_override(user.id, Some(PlanId::Pro), Some(SubscriptionStatus::Active))
            .await
            .unwrap();
        assert_eq!(updated.plan, PlanId::Pro);
        assert_eq!(updated.status, SubscriptionStatus::Active);

        let external = f
            .gateway
            .fetch_subscription(sub.billing_subscription_ref.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(external.plan, Some(PlanId::Basic));

        let err = f.service.admin_override(user.id, None, None).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
    }
}
