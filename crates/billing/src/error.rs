//! Billing error types

use listwise_shared::StoreError;
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// Catalog or deployment defect (unknown plan, missing price id, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Active subscription required")]
    SubscriptionRequired,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Upstream timed out: {0}")]
    Timeout(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    WebhookPayload(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl BillingError {
    /// Errors worth one retry on an idempotent read.
    pub fn is_transient(&self) -> bool {
        matches!(self, BillingError::Database(_) | BillingError::Upstream(_))
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => BillingError::NotFound(what),
            StoreError::Conflict(what) => BillingError::AlreadyExists(what),
            StoreError::Corrupt(what) => BillingError::Config(what),
            StoreError::Database(msg) => BillingError::Database(msg),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_record_is_configuration_error() {
        let err: BillingError = StoreError::Corrupt("plan platinum".to_string()).into();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(BillingError::Database("conn reset".to_string()).is_transient());
        assert!(!BillingError::Timeout("store".to_string()).is_transient());
        assert!(!BillingError::Config("x".to_string()).is_transient());
    }
}
