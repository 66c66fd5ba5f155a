#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Listwise Shared Types and Storage
//!
//! Records, store errors and the repository layer shared by the billing
//! engine and the API server.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use db::*;
pub use error::*;
pub use store::{
    Datastore, StoreHealth, SubscriptionRepository, UsageEventRepository, UsageRepository,
    UserRepository,
};
pub use types::*;
