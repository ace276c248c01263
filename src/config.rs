//! Application configuration management.
//!
//! Configuration is loaded from environment variables with `envy`, after an
//! optional `.env` file has been applied by `dotenvy`.

use serde::Deserialize;

use crate::services::qr_token::{MAX_TOKEN_TTL_SECS, MIN_TOKEN_TTL_SECS, SigningKey, SigningKeys};

/// Minimum signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `QR_SIGNING_SECRET` (required): HMAC key for QR tokens, at least 32 bytes
/// - `QR_SIGNING_KEY_ID` (optional): identifier embedded in issued tokens, defaults to "k1"
/// - `QR_PREVIOUS_SIGNING_SECRET` / `QR_PREVIOUS_SIGNING_KEY_ID` (optional):
///   still accepted for verification during key rotation
/// - `QR_TOKEN_TTL_SECS` (optional): token lifetime, 10..=300, defaults to 30
/// - `QR_MAX_ACTIVE_TOKENS` (optional): unexpired tokens allowed per worksite, defaults to 5
/// - `CHECK_IN_CANCEL_GRACE_SECS` (optional): cancellation window, defaults to 300
/// - `CHECKOUT_RADIUS_MULTIPLIER` (optional): check-out radius factor, defaults to 2.0
#[derive(Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    pub qr_signing_secret: String,

    #[serde(default = "default_key_id")]
    pub qr_signing_key_id: String,

    pub qr_previous_signing_secret: Option<String>,

    pub qr_previous_signing_key_id: Option<String>,

    #[serde(default = "default_token_ttl")]
    pub qr_token_ttl_secs: i64,

    #[serde(default = "default_max_active_tokens")]
    pub qr_max_active_tokens: u32,

    #[serde(default = "default_cancel_grace")]
    pub check_in_cancel_grace_secs: i64,

    #[serde(default = "default_checkout_multiplier")]
    pub checkout_radius_multiplier: f64,
}

// Secrets stay out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server_port", &self.server_port)
            .field("database_max_connections", &self.database_max_connections)
            .field("qr_signing_key_id", &self.qr_signing_key_id)
            .field("qr_previous_signing_key_id", &self.qr_previous_signing_key_id)
            .field("qr_token_ttl_secs", &self.qr_token_ttl_secs)
            .field("qr_max_active_tokens", &self.qr_max_active_tokens)
            .field("check_in_cancel_grace_secs", &self.check_in_cancel_grace_secs)
            .field("checkout_radius_multiplier", &self.checkout_radius_multiplier)
            .finish_non_exhaustive()
    }
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_key_id() -> String {
    "k1".to_string()
}

fn default_token_ttl() -> i64 {
    30
}

fn default_max_active_tokens() -> u32 {
    5
}

fn default_cancel_grace() -> i64 {
    300
}

fn default_checkout_multiplier() -> f64 {
    2.0
}

/// Configuration values that parsed but are out of range.
#[derive(Debug, thiserror::Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` first if present, then deserializes the environment.
    /// Field names map to upper-case variables: `database_url` -> `DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing, values cannot be
    /// parsed, or a value fails [`Config::validate`].
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would silently weaken verification.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.qr_signing_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError(format!(
                "QR_SIGNING_SECRET must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if let Some(previous) = &self.qr_previous_signing_secret {
            if previous.len() < MIN_SECRET_LEN {
                return Err(ConfigError(format!(
                    "QR_PREVIOUS_SIGNING_SECRET must be at least {} bytes",
                    MIN_SECRET_LEN
                )));
            }
            if self.qr_previous_signing_key_id.is_none() {
                return Err(ConfigError(
                    "QR_PREVIOUS_SIGNING_KEY_ID is required with QR_PREVIOUS_SIGNING_SECRET"
                        .to_string(),
                ));
            }
            if self.qr_previous_signing_key_id.as_deref() == Some(self.qr_signing_key_id.as_str())
            {
                return Err(ConfigError(
                    "previous and current QR signing key ids must differ".to_string(),
                ));
            }
        }
        if !(MIN_TOKEN_TTL_SECS..=MAX_TOKEN_TTL_SECS).contains(&self.qr_token_ttl_secs) {
            return Err(ConfigError(format!(
                "QR_TOKEN_TTL_SECS must be between {} and {}",
                MIN_TOKEN_TTL_SECS, MAX_TOKEN_TTL_SECS
            )));
        }
        if self.qr_max_active_tokens == 0 {
            return Err(ConfigError(
                "QR_MAX_ACTIVE_TOKENS must be at least 1".to_string(),
            ));
        }
        if self.check_in_cancel_grace_secs < 0 {
            return Err(ConfigError(
                "CHECK_IN_CANCEL_GRACE_SECS must not be negative".to_string(),
            ));
        }
        if !self.checkout_radius_multiplier.is_finite() || self.checkout_radius_multiplier < 1.0 {
            return Err(ConfigError(
                "CHECKOUT_RADIUS_MULTIPLIER must be a finite number >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Key ring used by both the token issuer and verifier.
    pub fn signing_keys(&self) -> SigningKeys {
        let current = SigningKey::new(
            self.qr_signing_key_id.clone(),
            self.qr_signing_secret.as_bytes().to_vec(),
        );
        let previous = match (
            &self.qr_previous_signing_key_id,
            &self.qr_previous_signing_secret,
        ) {
            (Some(id), Some(secret)) => Some(SigningKey::new(id.clone(), secret.as_bytes().to_vec())),
            _ => None,
        };
        SigningKeys::new(current, previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            database_url: "postgres://localhost/attendance".to_string(),
            server_port: default_port(),
            database_max_connections: default_max_connections(),
            qr_signing_secret: "0123456789abcdef0123456789abcdef".to_string(),
            qr_signing_key_id: default_key_id(),
            qr_previous_signing_secret: None,
            qr_previous_signing_key_id: None,
            qr_token_ttl_secs: default_token_ttl(),
            qr_max_active_tokens: default_max_active_tokens(),
            check_in_cancel_grace_secs: default_cancel_grace(),
            checkout_radius_multiplier: default_checkout_multiplier(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut config = base();
        config.qr_signing_secret = "too-short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn token_ttl_must_stay_within_bounds() {
        let mut config = base();
        config.qr_token_ttl_secs = 5;
        assert!(config.validate().is_err());
        config.qr_token_ttl_secs = 301;
        assert!(config.validate().is_err());
        config.qr_token_ttl_secs = 300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn previous_key_requires_distinct_id() {
        let mut config = base();
        config.qr_previous_signing_secret = Some("fedcba9876543210fedcba9876543210".to_string());
        assert!(config.validate().is_err());

        config.qr_previous_signing_key_id = Some("k1".to_string());
        assert!(config.validate().is_err());

        config.qr_previous_signing_key_id = Some("k0".to_string());
        assert!(config.validate().is_ok());
        assert!(config.signing_keys().find("k0").is_some());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", base());
        assert!(!rendered.contains("0123456789abcdef"));
        assert!(!rendered.contains("postgres://"));
    }
}
