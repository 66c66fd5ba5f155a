//! Bearer tokens signed with HS256

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{Identity, TokenVerifier};

/// Allowed clock skew when checking `exp`, in seconds
const LEEWAY_SECS: u64 = 60;

/// Payload carried by every token the API hands out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User the token was issued to
    pub sub: Uuid,
    /// Subscription current at issue time
    pub subscription_id: Option<Uuid>,
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            user_id: claims.sub,
            subscription_id: claims.subscription_id,
            email: claims.email,
            is_admin: claims.is_admin,
        }
    }
}

/// Issues and checks tokens with one shared secret
#[derive(Clone)]
pub struct JwtManager {
    signing: EncodingKey,
    verifying: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;

        Self {
            signing: EncodingKey::from_secret(secret.as_bytes()),
            verifying: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime: Duration::hours(expiry_hours),
        }
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        subscription_id: Option<Uuid>,
        email: &str,
        is_admin: bool,
    ) -> Result<String, JwtError> {
        let issued = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id,
            subscription_id,
            email: email.to_owned(),
            is_admin,
            iat: issued.unix_timestamp(),
            exp: (issued + self.lifetime).unix_timestamp(),
        };

        // Pin the header algorithm; decoding only accepts HS256
        encode(&Header::new(Algorithm::HS256), &claims, &self.signing)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        match decode::<Claims>(token, &self.verifying, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => Err(match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                ErrorKind::InvalidToken
                | ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            }),
        }
    }

    /// Token lifetime in seconds
    pub fn expiry_seconds(&self) -> i64 {
        self.lifetime.whole_seconds()
    }
}

impl TokenVerifier for JwtManager {
    fn verify(&self, token: &str) -> Result<Identity, JwtError> {
        self.validate_token(token).map(Identity::from)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("token expired")]
    Expired,
    #[error("token rejected")]
    Invalid,
    #[error("could not sign token: {0}")]
    Encoding(String),
    #[error("could not validate token: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "listwise-test-signing-secret-0123456789";

    #[test]
    fn test_issued_token_verifies() {
        let jwt = JwtManager::new(SECRET, 24);
        let user_id = Uuid::new_v4();
        let subscription_id = Uuid::new_v4();

        let token = jwt
            .generate_token(user_id, Some(subscription_id), "seller@example.com", true)
            .unwrap();

        let identity = jwt.verify(&token).unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.subscription_id, Some(subscription_id));
        assert_eq!(identity.email, "seller@example.com");
        assert!(identity.is_admin);
        assert_eq!(jwt.expiry_seconds(), 24 * 3600);
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let issuer = JwtManager::new(SECRET, 24);
        let other = JwtManager::new("a-completely-different-signing-secret", 24);
        let token = issuer
            .generate_token(Uuid::new_v4(), None, "seller@example.com", false)
            .unwrap();

        assert!(matches!(other.verify(&token), Err(JwtError::Invalid)));
    }

    #[test]
    fn test_expired_token_rejected() {
        // An hour in the past is well beyond the leeway
        let jwt = JwtManager::new(SECRET, -1);
        let token = jwt
            .generate_token(Uuid::new_v4(), None, "seller@example.com", false)
            .unwrap();

        assert!(matches!(jwt.verify(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn test_garbage_rejected() {
        let jwt = JwtManager::new(SECRET, 24);
        assert!(jwt.verify("not.a.token").is_err());
    }
}
