//! Platform admin routes
//!
//! Every route here sits behind `require_auth` and `require_admin`.
//! - `users`: user listing, detail, status and subscription overrides
//! - `subscriptions`: subscription listing and revenue stats
//! - `reports`: usage analytics, per-user feature reports, system health
//! - `shared`: paging and window query types

pub mod reports;
pub mod shared;
pub mod subscriptions;
pub mod users;

pub use reports::{feature_usage_report, system_health, usage_analytics};
pub use subscriptions::{list_subscriptions, subscription_stats};
pub use users::{get_user, list_users, update_user_status, update_user_subscription};
