//! Stripe client configuration

use listwise_shared::PlanId;
use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Price IDs for each plan
    pub price_ids: PriceIds,
}

/// Stripe price IDs, one monthly price per plan
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub basic: String,
    pub pro: String,
    pub enterprise: String,
}

fn required(name: &'static str) -> BillingResult<String> {
    std::env::var(name).map_err(|_| BillingError::Config(format!("{} not set", name)))
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: required("STRIPE_SECRET_KEY")?,
            webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            price_ids: PriceIds {
                basic: required("STRIPE_PRICE_BASIC")?,
                pro: required("STRIPE_PRICE_PRO")?,
                enterprise: required("STRIPE_PRICE_ENTERPRISE")?,
            },
        })
    }

    pub fn price_id_for_plan(&self, plan: PlanId) -> &str {
        match plan {
            PlanId::Basic => &self.price_ids.basic,
            PlanId::Pro => &self.price_ids.pro,
            PlanId::Enterprise => &self.price_ids.enterprise,
        }
    }

    pub fn plan_for_price_id(&self, price_id: &str) -> Option<PlanId> {
        PlanId::ALL
            .into_iter()
            .find(|plan| self.price_id_for_plan(*plan) == price_id)
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_x".to_string(),
            webhook_secret: "whsec_x".to_string(),
            price_ids: PriceIds {
                basic: "price_basic".to_string(),
                pro: "price_pro".to_string(),
                enterprise: "price_enterprise".to_string(),
            },
        }
    }

    #[test]
    fn test_price_lookup_both_ways() {
        let config = config();
        for plan in PlanId::ALL {
            let price = config.price_id_for_plan(plan).to_string();
            assert_eq!(config.plan_for_price_id(&price), Some(plan));
        }
        assert_eq!(config.plan_for_price_id("price_unknown"), None);
    }
}
