//! Authentication routes

use axum::{extract::State, http::StatusCode, Json};
use listwise_shared::{PlanId, Subscription, SubscriptionStatus, User};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{hash_password, validate_password_strength, verify_password},
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    /// Defaults to basic
    pub plan: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub id: Uuid,
    pub plan: PlanId,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    /// Present while the subscription is trialing
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_end: Option<OffsetDateTime>,
}

impl From<&Subscription> for SubscriptionSummary {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id,
            plan: sub.plan,
            status: sub.status,
            current_period_end: sub.current_period_end,
            trial_end: (sub.status == SubscriptionStatus::Trialing)
                .then_some(sub.current_period_end),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_admin: bool,
    pub subscription: Option<SubscriptionSummary>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub user: AuthUserResponse,
    pub token: String,
    /// Token lifetime in seconds
    pub expires_in: i64,
}

// =============================================================================
// Helpers
// =============================================================================

fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.len() > 254 {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    if !local
        .chars()
        .all(|c| c.is_alphanumeric() || ".+-_".contains(c))
    {
        return false;
    }

    if domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']) || domain.contains("..") {
        return false;
    }
    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return false;
    }
    // Must have valid TLD (at least 2 chars, alpha only)
    match domain.rsplit_once('.') {
        Some((_, tld)) => tld.len() >= 2 && tld.chars().all(|c| c.is_alphabetic()),
        None => false,
    }
}

fn validate_name(field: &str, value: &str) -> ApiResult<()> {
    let value = value.trim();
    if value.is_empty() || value.len() > 100 {
        return Err(ApiError::Validation(format!(
            "{} must be between 1 and 100 characters",
            field
        )));
    }
    Ok(())
}

/// True when `user` exists without any subscription and `password` is theirs.
async fn awaiting_setup(state: &AppState, user: &User, password: &str) -> ApiResult<bool> {
    if !user.is_active || state.subscriptions.get_by_user_id(user.id).await?.is_some() {
        return Ok(false);
    }
    Ok(verify_password(password, &user.password_hash).unwrap_or(false))
}

/// Retry the trial a failed registration never created. Failure leaves the
/// login subscription-less; the next login tries again.
async fn resume_trial(state: &AppState, user: &User) -> Option<Subscription> {
    match state
        .lifecycle
        .start_trial(user, PlanId::Basic, state.config.trial_days)
        .await
    {
        Ok(subscription) => {
            tracing::info!(user_id = %user.id, "Started trial on login after incomplete registration");
            Some(subscription)
        }
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "Trial setup still failing at login");
            None
        }
    }
}

fn issue_token(
    state: &AppState,
    user: &User,
    subscription: Option<&Subscription>,
) -> ApiResult<(String, bool)> {
    let is_admin = state.config.is_admin(user.id);
    let token = state
        .jwt
        .generate_token(user.id, subscription.map(|s| s.id), &user.email, is_admin)
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %user.id, "Failed to issue token");
            ApiError::Internal
        })?;
    Ok((token, is_admin))
}

// =============================================================================
// Handlers
// =============================================================================

/// Create an account and start its trial subscription
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    if !is_valid_email(&req.email) {
        return Err(ApiError::Validation("Invalid email format".to_string()));
    }
    validate_password_strength(&req.password).map_err(|e| ApiError::Validation(e.to_string()))?;
    validate_name("firstName", &req.first_name)?;
    validate_name("lastName", &req.last_name)?;

    let plan = match req.plan.as_deref() {
        None => PlanId::Basic,
        Some(raw) => raw
            .parse::<PlanId>()
            .map_err(|_| ApiError::Validation(format!("Unknown plan: {}", raw)))?,
    };

    let email = req.email.trim().to_lowercase();
    let user = match state.find_user_by_email(&email).await? {
        // An earlier attempt created the account but not its subscription
        Some(existing) if awaiting_setup(&state, &existing, &req.password).await? => {
            tracing::info!(user_id = %existing.id, "Resuming registration without a subscription");
            existing
        }
        Some(_) => {
            return Err(ApiError::Conflict(
                "User already exists with this email".to_string(),
            ));
        }
        None => {
            let password_hash = hash_password(&req.password).map_err(|e| {
                tracing::error!(error = %e, "Password hashing failed");
                ApiError::Internal
            })?;

            let now = OffsetDateTime::now_utc();
            let user = User {
                id: Uuid::new_v4(),
                email,
                password_hash,
                first_name: req.first_name.trim().to_string(),
                last_name: req.last_name.trim().to_string(),
                billing_customer_ref: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            state.insert_user(&user).await?;
            user
        }
    };

    let subscription = state
        .lifecycle
        .start_trial(&user, plan, state.config.trial_days)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "Trial setup failed after account creation");
            e
        })?;

    let (token, is_admin) = issue_token(&state, &user, Some(&subscription))?;

    tracing::info!(user_id = %user.id, plan = %plan, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully",
            user: AuthUserResponse {
                id: user.id,
                email: user.email,
                first_name: user.first_name,
                last_name: user.last_name,
                is_admin,
                subscription: Some(SubscriptionSummary::from(&subscription)),
            },
            token,
            expires_in: state.jwt.expiry_seconds(),
        }),
    ))
}

/// Exchange email and password for a bearer token
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = req.email.trim().to_lowercase();

    let user = state
        .find_user_by_email(&email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let valid = verify_password(&req.password, &user.password_hash).map_err(|e| {
        tracing::error!(user_id = %user.id, error = %e, "Stored password hash unreadable");
        ApiError::Internal
    })?;
    if !valid {
        tracing::info!(user_id = %user.id, "login: password mismatch");
        return Err(ApiError::InvalidCredentials);
    }
    if !user.is_active {
        tracing::info!(user_id = %user.id, "login: account deactivated");
        return Err(ApiError::AccountDisabled);
    }

    let subscription = match state.subscriptions.get_by_user_id(user.id).await? {
        Some(existing) => Some(existing),
        None => resume_trial(&state, &user).await,
    };
    let (token, is_admin) = issue_token(&state, &user, subscription.as_ref())?;

    tracing::info!(user_id = %user.id, is_admin = is_admin, "User logged in");

    Ok(Json(AuthResponse {
        message: "Login successful",
        user: AuthUserResponse {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            is_admin,
            subscription: subscription.as_ref().map(SubscriptionSummary::from),
        },
        token,
        expires_in: state.jwt.expiry_seconds(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("seller@example.com"));
        assert!(is_valid_email("first.last+listings@shop.co.uk"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email(".lead@example.com"));
        assert!(!is_valid_email("user@localhost"));
        assert!(!is_valid_email("user@example.c0m"));
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("firstName", "Ada").is_ok());
        assert!(validate_name("firstName", "   ").is_err());
        assert!(validate_name("lastName", &"x".repeat(101)).is_err());
    }
}
