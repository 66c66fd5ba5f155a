//! Authentication for the Listwise API

pub mod jwt;
pub mod middleware;
pub mod password;

use uuid::Uuid;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{require_admin, require_auth};
pub use password::{hash_password, validate_password_strength, verify_password};

/// Caller identity attached to the request once the bearer token checks out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    /// Subscription current when the token was issued; gates reload by user id
    pub subscription_id: Option<Uuid>,
    pub email: String,
    pub is_admin: bool,
}

/// Bearer credential verification
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, JwtError>;
}
