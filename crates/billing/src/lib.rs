// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries upstream messages
#![allow(clippy::too_many_arguments)] // Ledger calls take user, subscription, type, amount and time
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Listwise Billing Module
//!
//! Plans, usage metering and access decisions for Listwise subscriptions.
//!
//! ## Features
//!
//! - **Plan Catalog**: Three tiers and their capability values, validated at startup
//! - **Usage Ledger**: Monthly per-user counters with atomic increments
//! - **Quota Enforcement**: Pure allow/deny decisions with typed denial reasons
//! - **Subscription Lifecycle**: Trials, plan changes and cancellation via the billing gateway
//! - **Webhooks**: Signed billing events reconciled into local subscription state
//! - **Analytics**: Subscription and usage reports for admins

pub mod analytics;
pub mod client;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod plans;
pub mod quota;
pub mod subscriptions;
pub mod timeout;
pub mod usage;
pub mod webhooks;

// Analytics
pub use analytics::{
    AnalyticsService, FeatureUsageReport, SubscriptionStats, UsageAnalytics, UsageSummary,
};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{map_external_status, BillingGateway, ExternalSubscription, OfflineGateway, StripeGateway};

// Lifecycle
pub use lifecycle::{SubscriptionService, DEFAULT_TRIAL_DAYS};

// Plans
pub use plans::{Feature, FeatureKind, FeatureValue, Plan, PlanCatalog, UNLIMITED};

// Quota
pub use quota::{Denial, FeatureCheck, LimitCheck, Marketplace, MarketplaceCheck, QuotaEnforcer};

// Subscriptions
pub use subscriptions::SubscriptionStore;

// Timeouts
pub use timeout::CallTimeouts;

// Usage
pub use usage::{MonthlyUsage, UsageLedger, UsagePeriod, UsageType};

// Webhooks
pub use webhooks::{sign_payload, BillingEvent, EventKind, WebhookOutcome, WebhookReconciler};
