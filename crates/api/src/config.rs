//! Application configuration

use std::env;

use uuid::Uuid;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    /// `None` runs against the in-memory store
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub admin_user_ids: Vec<Uuid>,

    // Billing
    pub enable_billing: bool,
    pub trial_days: u32,
    /// Signing secret for webhooks when the offline gateway is in use
    pub billing_webhook_secret: Option<String>,

    // Collaborator deadlines
    pub store_timeout_ms: u64,
    pub billing_timeout_ms: u64,
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_admin_ids(raw: &str) -> Result<Vec<Uuid>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Uuid>().map_err(|_| ConfigError::Invalid("ADMIN_USER_IDS")))
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 20),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: parsed("JWT_EXPIRY_HOURS", 168),
            admin_user_ids: parse_admin_ids(&env::var("ADMIN_USER_IDS").unwrap_or_default())?,

            // Billing
            enable_billing: parsed("ENABLE_BILLING", true),
            trial_days: parsed("TRIAL_DAYS", listwise_billing::DEFAULT_TRIAL_DAYS),
            billing_webhook_secret: env::var("BILLING_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),

            // Collaborator deadlines
            store_timeout_ms: parsed("STORE_TIMEOUT_MS", 2_000),
            billing_timeout_ms: parsed("BILLING_TIMEOUT_MS", 10_000),
        })
    }

    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}
