//! Argon2id password storage and the sign-up strength rules

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

const MIN_LEN: usize = 8;
const MAX_LEN: usize = 128;

/// PHC string for `password` with a fresh random salt
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hashing(e.to_string()))?;
    Ok(phc.to_string())
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable
pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let phc = PasswordHash::new(stored).map_err(|e| PasswordError::InvalidHash(e.to_string()))?;
    let matches = Argon2::default()
        .verify_password(password.as_bytes(), &phc)
        .is_ok();
    Ok(matches)
}

pub fn validate_password_strength(password: &str) -> Result<(), PasswordValidationError> {
    match password.len() {
        n if n < MIN_LEN => Err(PasswordValidationError::TooShort),
        n if n > MAX_LEN => Err(PasswordValidationError::TooLong),
        _ if !password.chars().any(|c| c.is_ascii_alphabetic()) => {
            Err(PasswordValidationError::MissingLetter)
        }
        _ if !password.chars().any(|c| c.is_ascii_digit()) => {
            Err(PasswordValidationError::MissingDigit)
        }
        _ => Ok(()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("could not hash password: {0}")]
    Hashing(String),
    #[error("stored password hash is malformed: {0}")]
    InvalidHash(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordValidationError {
    #[error("password must be at least 8 characters")]
    TooShort,
    #[error("password must be at most 128 characters")]
    TooLong,
    #[error("password must contain a letter")]
    MissingLetter,
    #[error("password must contain a digit")]
    MissingDigit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let stored = hash_password("listing-pass-42").unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify_password("listing-pass-42", &stored).unwrap());
        assert!(!verify_password("wrong-pass-42", &stored).unwrap());
    }

    #[test]
    fn test_malformed_hash() {
        let result = verify_password("x", "not-a-hash");
        assert!(matches!(result, Err(PasswordError::InvalidHash(_))));
    }

    #[test]
    fn test_strength_rules() {
        assert!(matches!(
            validate_password_strength("short1"),
            Err(PasswordValidationError::TooShort)
        ));
        assert!(matches!(
            validate_password_strength("nodigitshere"),
            Err(PasswordValidationError::MissingDigit)
        ));
        assert!(matches!(
            validate_password_strength("12345678"),
            Err(PasswordValidationError::MissingLetter)
        ));
        assert!(validate_password_strength("reseller2024").is_ok());
    }
}
