//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use listwise_billing::{BillingError, Marketplace};
use listwise_shared::{PlanId, StoreError};
use serde_json::{json, Map, Value};

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Account is deactivated")]
    AccountDisabled,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid webhook signature")]
    InvalidSignature,

    // Resource errors
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),

    // Access control
    #[error("Active subscription required")]
    SubscriptionRequired,
    #[error("Feature not available on the {current_plan} plan")]
    FeatureUnavailable {
        feature: String,
        current_plan: PlanId,
    },
    #[error("Marketplace not available on the {current_plan} plan")]
    MarketplaceUnavailable {
        marketplace: Marketplace,
        current_plan: PlanId,
        required_plan: Option<PlanId>,
    },
    #[error("Monthly quota exceeded")]
    QuotaExceeded {
        limit: i64,
        current: i64,
        plan: PlanId,
    },

    // Collaborator failures
    #[error("Configuration error")]
    Configuration(String),
    #[error("Upstream service error")]
    Upstream(String),
    #[error("Upstream service timed out")]
    UpstreamTimeout(String),

    // Internal errors
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials | ApiError::InvalidToken | ApiError::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden
            | ApiError::AccountDisabled
            | ApiError::SubscriptionRequired
            | ApiError::FeatureUnavailable { .. }
            | ApiError::MarketplaceUnavailable { .. } => StatusCode::FORBIDDEN,
            ApiError::Validation(_) | ApiError::BadRequest(_) | ApiError::InvalidSignature => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Configuration(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::AccountDisabled => "ACCOUNT_DISABLED",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidSignature => "INVALID_SIGNATURE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::SubscriptionRequired => "SUBSCRIPTION_REQUIRED",
            ApiError::FeatureUnavailable { .. } => "FEATURE_UNAVAILABLE",
            ApiError::MarketplaceUnavailable { .. } => "MARKETPLACE_UNAVAILABLE",
            ApiError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            ApiError::Configuration(_) => "CONFIGURATION_ERROR",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }

    /// Extra fields carried next to `code` and `message`.
    fn details(&self) -> Map<String, Value> {
        let details = match self {
            ApiError::SubscriptionRequired => json!({ "upgradeRequired": true }),
            ApiError::FeatureUnavailable {
                feature,
                current_plan,
            } => json!({
                "feature": feature,
                "currentPlan": current_plan,
                "upgradeRequired": true,
            }),
            ApiError::MarketplaceUnavailable {
                marketplace,
                current_plan,
                required_plan,
            } => json!({
                "marketplace": marketplace,
                "currentPlan": current_plan,
                "requiredPlan": required_plan,
                "upgradeRequired": true,
            }),
            ApiError::QuotaExceeded {
                limit,
                current,
                plan,
            } => json!({
                "limit": limit,
                "current": current,
                "plan": plan,
                "upgradeRequired": true,
            }),
            _ => json!({}),
        };
        match details {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Validation(msg) | ApiError::BadRequest(msg) => msg.clone(),
            // Collaborator detail stays in the logs
            ApiError::Configuration(detail) => {
                tracing::error!(detail = %detail, "Configuration error");
                self.to_string()
            }
            ApiError::Upstream(detail) | ApiError::UpstreamTimeout(detail) => {
                tracing::warn!(detail = %detail, code = self.code(), "Upstream failure");
                self.to_string()
            }
            _ => self.to_string(),
        };

        let mut error = self.details();
        error.insert("code".to_string(), Value::from(self.code()));
        error.insert("message".to_string(), Value::from(message));

        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Config(msg) => ApiError::Configuration(msg),
            BillingError::NotFound(what) => ApiError::NotFound(what),
            BillingError::SubscriptionRequired => ApiError::SubscriptionRequired,
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::AlreadyExists(what) => ApiError::Conflict(what),
            BillingError::StripeApi(msg)
            | BillingError::Upstream(msg)
            | BillingError::Database(msg) => ApiError::Upstream(msg),
            BillingError::Timeout(what) => ApiError::UpstreamTimeout(what),
            BillingError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            BillingError::WebhookPayload(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        BillingError::from(err).into()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_quota_exceeded_shape() {
        let (status, body) = body_of(ApiError::QuotaExceeded {
            limit: 100,
            current: 100,
            plan: PlanId::Basic,
        })
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
        assert_eq!(body["error"]["limit"], 100);
        assert_eq!(body["error"]["current"], 100);
        assert_eq!(body["error"]["plan"], "basic");
        assert_eq!(body["error"]["upgradeRequired"], true);
    }

    #[tokio::test]
    async fn test_marketplace_shape() {
        let (status, body) = body_of(ApiError::MarketplaceUnavailable {
            marketplace: Marketplace::Facebook,
            current_plan: PlanId::Basic,
            required_plan: Some(PlanId::Pro),
        })
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "MARKETPLACE_UNAVAILABLE");
        assert_eq!(body["error"]["marketplace"], "facebook");
        assert_eq!(body["error"]["requiredPlan"], "pro");
    }

    #[tokio::test]
    async fn test_configuration_detail_not_leaked() {
        let (status, body) =
            body_of(ApiError::Configuration("price id missing for pro".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");
        assert!(!body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("price id"));
    }

    #[test]
    fn test_billing_error_mapping() {
        assert_eq!(
            ApiError::from(BillingError::Timeout("store".to_string())).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(BillingError::Database("down".to_string())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(BillingError::AlreadyExists("email".to_string())).status(),
            StatusCode::CONFLICT
        );
    }
}
