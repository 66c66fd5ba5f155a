//! Deadlines for collaborator calls
//!
//! Every store and billing-service call goes through [`bounded`]. Idempotent
//! reads may additionally go through [`retry_read`], which retries once on a
//! transient failure. Increments and billing mutations are never retried.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use crate::error::{BillingError, BillingResult};

const RETRY_DELAY_MS: u64 = 25;

/// Per-collaborator call deadlines
#[derive(Debug, Clone, Copy)]
pub struct CallTimeouts {
    pub store: Duration,
    pub billing: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_millis(2_000),
            billing: Duration::from_millis(10_000),
        }
    }
}

impl CallTimeouts {
    pub fn from_millis(store_ms: u64, billing_ms: u64) -> Self {
        Self {
            store: Duration::from_millis(store_ms),
            billing: Duration::from_millis(billing_ms),
        }
    }
}

/// Run `fut` with a deadline; an elapsed deadline becomes `BillingError::Timeout`.
pub async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> BillingResult<T>
where
    F: Future<Output = BillingResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation = %what,
                timeout_ms = limit.as_millis() as u64,
                "Collaborator call timed out"
            );
            Err(BillingError::Timeout(what.to_string()))
        }
    }
}

/// Bounded idempotent read, retried once when the first attempt fails transiently.
pub async fn retry_read<T, A, Fut>(limit: Duration, what: &str, mut action: A) -> BillingResult<T>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = BillingResult<T>>,
{
    let strategy = FixedInterval::from_millis(RETRY_DELAY_MS).take(1);
    RetryIf::spawn(
        strategy,
        || bounded(limit, what, action()),
        |err: &BillingError| {
            let retry = err.is_transient();
            if retry {
                tracing::debug!(operation = %what, error = %err, "Retrying idempotent read");
            }
            retry
        },
    )
    .await
}
