// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Listwise API Library
//!
//! HTTP surface for Listwise: accounts, subscriptions, plan-gated admission
//! of listing and analysis work, billing webhooks and admin reports.

pub mod access;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
