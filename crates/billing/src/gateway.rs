//! External billing service boundary
//!
//! [`StripeGateway`] talks to Stripe. [`OfflineGateway`] keeps subscriptions in
//! process memory and is used when billing is disabled and in tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use listwise_shared::{PlanId, SubscriptionStatus};
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{
    BillingPortalSession, CancelSubscription, CreateBillingPortalSession, CreateCustomer,
    CreateSubscription, CreateSubscriptionItems, Customer, CustomerId,
    Subscription as StripeSubscription, SubscriptionId,
    SubscriptionStatus as StripeSubStatus, UpdateSubscription, UpdateSubscriptionItems,
};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Billing-service view of a subscription, already mapped to local statuses
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSubscription {
    pub id: String,
    pub customer_id: String,
    pub plan: Option<PlanId>,
    pub status: SubscriptionStatus,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
}

/// Map a billing-service status string onto the local status set.
pub fn map_external_status(status: &str) -> Option<SubscriptionStatus> {
    match status {
        "active" => Some(SubscriptionStatus::Active),
        "trialing" => Some(SubscriptionStatus::Trialing),
        "past_due" | "paused" => Some(SubscriptionStatus::PastDue),
        "unpaid" | "incomplete" => Some(SubscriptionStatus::Unpaid),
        "canceled" | "cancelled" | "incomplete_expired" => Some(SubscriptionStatus::Cancelled),
        _ => None,
    }
}

#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Returns the external customer id.
    async fn create_customer(&self, user_id: Uuid, email: &str, name: &str) -> BillingResult<String>;

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan: PlanId,
        trial_days: u32,
    ) -> BillingResult<ExternalSubscription>;

    /// Swap the subscription's price to `plan`, prorating the difference.
    async fn change_plan(&self, subscription_id: &str, plan: PlanId) -> BillingResult<ExternalSubscription>;

    async fn cancel(&self, subscription_id: &str, at_period_end: bool) -> BillingResult<ExternalSubscription>;

    async fn fetch_subscription(&self, subscription_id: &str) -> BillingResult<ExternalSubscription>;

    /// Hosted page where the customer manages payment details. Returns its URL.
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> BillingResult<String>;
}

// =============================================================================
// Stripe
// =============================================================================

#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    fn parse_subscription_id(id: &str) -> BillingResult<SubscriptionId> {
        id.parse::<SubscriptionId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid subscription ID: {}", e)))
    }

    fn parse_customer_id(id: &str) -> BillingResult<CustomerId> {
        id.parse::<CustomerId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid customer ID: {}", e)))
    }

    fn map_status(status: StripeSubStatus) -> SubscriptionStatus {
        map_external_status(status.as_str()).unwrap_or_else(|| {
            tracing::warn!(status = status.as_str(), "Unrecognised Stripe status, treating as unpaid");
            SubscriptionStatus::Unpaid
        })
    }

    fn to_external(&self, subscription: &StripeSubscription) -> ExternalSubscription {
        let status = Self::map_status(subscription.status);

        let plan = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .and_then(|price| self.stripe.config().plan_for_price_id(price.id.as_str()));

        let now = OffsetDateTime::now_utc();
        ExternalSubscription {
            id: subscription.id.to_string(),
            customer_id: subscription.customer.id().to_string(),
            plan,
            status,
            current_period_start: OffsetDateTime::from_unix_timestamp(
                subscription.current_period_start,
            )
            .unwrap_or(now),
            current_period_end: OffsetDateTime::from_unix_timestamp(
                subscription.current_period_end,
            )
            .unwrap_or(now),
            cancel_at_period_end: subscription.cancel_at_period_end,
        }
    }
}

#[async_trait]
impl BillingGateway for StripeGateway {
    async fn create_customer(&self, user_id: Uuid, email: &str, name: &str) -> BillingResult<String> {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("platform".to_string(), "listwise".to_string());

        let params = CreateCustomer {
            email: Some(email),
            name: Some(name),
            metadata: Some(metadata),
            ..Default::default()
        };
        let customer = Customer::create(self.stripe.inner(), params).await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );
        Ok(customer.id.to_string())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan: PlanId,
        trial_days: u32,
    ) -> BillingResult<ExternalSubscription> {
        let price_id = self.stripe.config().price_id_for_plan(plan).to_string();
        let customer_id = Self::parse_customer_id(customer_id)?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("plan".to_string(), plan.to_string());

        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        if trial_days > 0 {
            params.trial_period_days = Some(trial_days);
        }
        params.metadata = Some(metadata);

        let subscription = StripeSubscription::create(self.stripe.inner(), params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            plan = %plan,
            trial_days = trial_days,
            "Created Stripe subscription"
        );
        Ok(self.to_external(&subscription))
    }

    async fn change_plan(&self, subscription_id: &str, plan: PlanId) -> BillingResult<ExternalSubscription> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;
        let price_id = self.stripe.config().price_id_for_plan(plan).to_string();

        // Need the current item id to swap its price
        let current = StripeSubscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| BillingError::Upstream("No subscription items found".to_string()))?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("plan".to_string(), plan.to_string());

        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(price_id),
                ..Default::default()
            }]),
            metadata: Some(metadata),
            proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
            ..Default::default()
        };
        let subscription = StripeSubscription::update(self.stripe.inner(), &sub_id, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            plan = %plan,
            "Changed Stripe subscription plan"
        );
        Ok(self.to_external(&subscription))
    }

    async fn cancel(&self, subscription_id: &str, at_period_end: bool) -> BillingResult<ExternalSubscription> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;

        let subscription = if at_period_end {
            let params = UpdateSubscription {
                cancel_at_period_end: Some(true),
                ..Default::default()
            };
            StripeSubscription::update(self.stripe.inner(), &sub_id, params).await?
        } else {
            let params = CancelSubscription {
                cancellation_details: None,
                invoice_now: None,
                prorate: None,
            };
            StripeSubscription::cancel(self.stripe.inner(), &sub_id, params).await?
        };

        tracing::info!(
            subscription_id = %subscription.id,
            at_period_end = at_period_end,
            "Cancelled Stripe subscription"
        );
        Ok(self.to_external(&subscription))
    }

    async fn fetch_subscription(&self, subscription_id: &str) -> BillingResult<ExternalSubscription> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;
        let subscription = StripeSubscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;
        Ok(self.to_external(&subscription))
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> BillingResult<String> {
        let mut params = CreateBillingPortalSession::new(Self::parse_customer_id(customer_id)?);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(self.stripe.inner(), params).await?;

        tracing::info!(customer_id = %session.customer, "Created billing portal session");
        Ok(session.url)
    }
}

// =============================================================================
// Offline
// =============================================================================

const OFFLINE_PERIOD_DAYS: i64 = 30;

#[derive(Default)]
struct OfflineState {
    customers: HashSet<String>,
    subscriptions: HashMap<String, ExternalSubscription>,
}

/// In-process billing service
#[derive(Default)]
pub struct OfflineGateway {
    state: Mutex<OfflineState>,
}

impl OfflineGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut OfflineState) -> BillingResult<T>) -> BillingResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BillingError::Upstream("offline billing state poisoned".to_string()))?;
        f(&mut state)
    }

    fn mutate(
        &self,
        subscription_id: &str,
        f: impl FnOnce(&mut ExternalSubscription),
    ) -> BillingResult<ExternalSubscription> {
        self.with_state(|state| {
            let sub = state
                .subscriptions
                .get_mut(subscription_id)
                .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))?;
            f(sub);
            Ok(sub.clone())
        })
    }

    /// Simulate a status change made on the billing side.
    pub fn set_status(&self, subscription_id: &str, status: SubscriptionStatus) -> BillingResult<()> {
        self.mutate(subscription_id, |sub| sub.status = status).map(|_| ())
    }

    /// Simulate a renewal moving the billing period.
    pub fn set_period(
        &self,
        subscription_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> BillingResult<()> {
        self.mutate(subscription_id, |sub| {
            sub.current_period_start = start;
            sub.current_period_end = end;
        })
        .map(|_| ())
    }
}

#[async_trait]
impl BillingGateway for OfflineGateway {
    async fn create_customer(&self, user_id: Uuid, _email: &str, _name: &str) -> BillingResult<String> {
        let id = format!("cus_offline_{}", user_id.simple());
        self.with_state(|state| {
            state.customers.insert(id.clone());
            Ok(())
        })?;
        Ok(id)
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan: PlanId,
        trial_days: u32,
    ) -> BillingResult<ExternalSubscription> {
        let now = OffsetDateTime::now_utc();
        let (status, period_end) = if trial_days > 0 {
            (SubscriptionStatus::Trialing, now + Duration::days(i64::from(trial_days)))
        } else {
            (SubscriptionStatus::Active, now + Duration::days(OFFLINE_PERIOD_DAYS))
        };
        let subscription = ExternalSubscription {
            id: format!("sub_offline_{}", Uuid::new_v4().simple()),
            customer_id: customer_id.to_string(),
            plan: Some(plan),
            status,
            current_period_start: now,
            current_period_end: period_end,
            cancel_at_period_end: false,
        };

        self.with_state(|state| {
            if !state.customers.contains(customer_id) {
                return Err(BillingError::NotFound(format!("customer {}", customer_id)));
            }
            state
                .subscriptions
                .insert(subscription.id.clone(), subscription.clone());
            Ok(())
        })?;
        Ok(subscription)
    }

    async fn change_plan(&self, subscription_id: &str, plan: PlanId) -> BillingResult<ExternalSubscription> {
        self.mutate(subscription_id, |sub| sub.plan = Some(plan))
    }

    async fn cancel(&self, subscription_id: &str, at_period_end: bool) -> BillingResult<ExternalSubscription> {
        self.mutate(subscription_id, |sub| {
            if at_period_end {
                sub.cancel_at_period_end = true;
            } else {
                sub.status = SubscriptionStatus::Cancelled;
            }
        })
    }

    async fn fetch_subscription(&self, subscription_id: &str) -> BillingResult<ExternalSubscription> {
        self.with_state(|state| {
            state
                .subscriptions
                .get(subscription_id)
                .cloned()
                .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))
        })
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> BillingResult<String> {
        self.with_state(|state| {
            if !state.customers.contains(customer_id) {
                return Err(BillingError::NotFound(format!("customer {}", customer_id)));
            }
            Ok(format!(
                "{}?portal_session=bps_offline_{}",
                return_url,
                Uuid::new_v4().simple()
            ))
        })
    }
}
