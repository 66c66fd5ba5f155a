//! Shared application state

use std::sync::Arc;

use listwise_billing::{
    timeout::{bounded, retry_read},
    AnalyticsService, BillingError, BillingGateway, BillingResult, CallTimeouts, PlanCatalog,
    QuotaEnforcer, SubscriptionService, SubscriptionStore, UsageLedger, WebhookReconciler,
};
use listwise_shared::{Datastore, User};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{JwtManager, TokenVerifier},
    config::Config,
    error::ApiResult,
};

/// Services built once at startup and cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Datastore,
    pub jwt: JwtManager,
    pub tokens: Arc<dyn TokenVerifier>,
    pub catalog: Arc<PlanCatalog>,
    pub enforcer: QuotaEnforcer,
    pub subscriptions: SubscriptionStore,
    pub ledger: UsageLedger,
    pub lifecycle: SubscriptionService,
    pub reconciler: WebhookReconciler,
    pub analytics: AnalyticsService,
    pub timeouts: CallTimeouts,
}

impl AppState {
    /// Wire the services over `store` and `gateway`. Fails when the plan
    /// catalog does not validate.
    pub fn new(
        config: Config,
        store: Datastore,
        gateway: Arc<dyn BillingGateway>,
        webhook_secret: String,
    ) -> BillingResult<Self> {
        let catalog = Arc::new(PlanCatalog::standard());
        catalog.validate()?;

        let timeouts = CallTimeouts::from_millis(config.store_timeout_ms, config.billing_timeout_ms);
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let subscriptions = SubscriptionStore::new(store.subscriptions.clone(), timeouts);
        let ledger = UsageLedger::new(store.usage.clone(), store.usage_events.clone(), timeouts);

        Ok(Self {
            tokens: Arc::new(jwt.clone()),
            enforcer: QuotaEnforcer::new(catalog.clone()),
            lifecycle: SubscriptionService::new(
                store.users.clone(),
                subscriptions.clone(),
                gateway.clone(),
                timeouts,
            ),
            reconciler: WebhookReconciler::new(
                subscriptions.clone(),
                gateway,
                webhook_secret,
                timeouts,
            ),
            analytics: AnalyticsService::new(
                store.users.clone(),
                subscriptions.clone(),
                ledger.clone(),
                catalog.clone(),
                timeouts,
            ),
            config: Arc::new(config),
            store,
            jwt,
            catalog,
            subscriptions,
            ledger,
            timeouts,
        })
    }

    pub async fn find_user(&self, id: Uuid) -> ApiResult<Option<User>> {
        let users = &self.store.users;
        Ok(retry_read(self.timeouts.store, "user.get", || async move {
            users.get(id).await.map_err(BillingError::from)
        })
        .await?)
    }

    pub async fn find_user_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        let users = &self.store.users;
        Ok(retry_read(self.timeouts.store, "user.get_by_email", || async move {
            users.get_by_email(email).await.map_err(BillingError::from)
        })
        .await?)
    }

    pub async fn list_users(&self, limit: i64, offset: i64) -> ApiResult<Vec<User>> {
        let users = &self.store.users;
        Ok(retry_read(self.timeouts.store, "user.list", || async move {
            users.list(limit, offset).await.map_err(BillingError::from)
        })
        .await?)
    }

    pub async fn insert_user(&self, user: &User) -> ApiResult<()> {
        Ok(bounded(self.timeouts.store, "user.insert", async {
            self.store.users.insert(user).await.map_err(BillingError::from)
        })
        .await?)
    }

    /// Returns false when the user does not exist.
    pub async fn set_user_active(&self, id: Uuid, active: bool) -> ApiResult<bool> {
        let now = OffsetDateTime::now_utc();
        Ok(bounded(self.timeouts.store, "user.set_active", async {
            self.store
                .users
                .set_active(id, active, now)
                .await
                .map_err(BillingError::from)
        })
        .await?)
    }
}
