//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `STRIPE_SECRET_KEY` - Stripe API secret key
//! - `STRIPE_WEBHOOK_SECRET` - Webhook signing secret (production)
//! - `EASYPOST_API_KEY` - EasyPost address verification key
//! - `RESEND_API_KEY` - Resend transactional email key
//! - `FROM_EMAIL` - Sender address for transactional email
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `DEPLOYMENT_MODE` - `development` or `production` (default: development)
//! - `STRIPE_WEBHOOK_SECRET_DEV` - Webhook signing secret from the Stripe
//!   CLI, used instead of `STRIPE_WEBHOOK_SECRET` in development mode
//! - `CHECKOUT_DEBOUNCE_MS` - Address-input debounce window (default: 1000)
//! - `HTTP_TIMEOUT_SECS` - Outbound request timeout (default: 10)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

use opticworks_core::Price;

/// Blocklist of common placeholder patterns (case-insensitive).
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Deployment mode; selects which webhook signing secret is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    #[default]
    Development,
    Production,
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
        }
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(format!("expected development or production, got {s}")),
        }
    }
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront (used in retry/success links)
    pub base_url: String,
    /// Deployment mode
    pub mode: DeploymentMode,
    /// Stripe API configuration
    pub stripe: StripeConfig,
    /// EasyPost address verification configuration
    pub easypost: EasyPostConfig,
    /// Resend transactional email configuration
    pub email: EmailConfig,
    /// Checkout flow tuning
    pub checkout: CheckoutConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Stripe API configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// API secret key (server-side only)
    pub secret_key: SecretString,
    /// Webhook signing secret for production deliveries
    pub webhook_secret: SecretString,
    /// Webhook signing secret from the Stripe CLI, for development
    pub webhook_secret_dev: Option<SecretString>,
}

impl StripeConfig {
    /// The webhook signing secret trusted in the given deployment mode.
    ///
    /// Development prefers the CLI secret when one is configured; there is
    /// no silent fallback in production.
    #[must_use]
    pub const fn webhook_secret_for(&self, mode: DeploymentMode) -> &SecretString {
        match (mode, &self.webhook_secret_dev) {
            (DeploymentMode::Development, Some(dev)) => dev,
            _ => &self.webhook_secret,
        }
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("webhook_secret_dev", &self.webhook_secret_dev.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// EasyPost address verification configuration.
#[derive(Clone)]
pub struct EasyPostConfig {
    /// API key (server-side only)
    pub api_key: SecretString,
}

impl std::fmt::Debug for EasyPostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EasyPostConfig")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Resend transactional email configuration.
#[derive(Clone)]
pub struct EmailConfig {
    /// API key (server-side only)
    pub api_key: SecretString,
    /// Sender address, e.g. `orders@optic.works`
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("api_key", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// Checkout flow tuning options.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Address-input debounce window.
    pub debounce: Duration,
    /// Timeout applied to outbound Stripe/EasyPost/Resend requests.
    pub http_timeout: Duration,
    /// Subtotal at or above which shipping is free.
    pub free_shipping_threshold: Price,
    /// Flat shipping rate below the threshold.
    pub flat_shipping_rate: Price,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            http_timeout: Duration::from_secs(10),
            free_shipping_threshold: Price::new(Decimal::new(200, 0)),
            flat_shipping_rate: Price::new(Decimal::new(1599, 2)),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid,
    /// or if a secret looks like a placeholder. Missing credentials are
    /// fatal here rather than at first use.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let database_url = SecretString::from(get_required_env("STOREFRONT_DATABASE_URL")?);
        let host = get_env_or_default("STOREFRONT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("STOREFRONT_HOST".to_owned(), e.to_string()))?;
        let port = get_env_or_default("STOREFRONT_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("STOREFRONT_PORT".to_owned(), e.to_string()))?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;
        // Emails and retry links are built from this; reject it early if
        // it is not an absolute URL.
        url::Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_owned(), e.to_string())
        })?;
        let base_url = base_url.trim_end_matches('/').to_owned();
        let mode = get_env_or_default("DEPLOYMENT_MODE", "development")
            .parse::<DeploymentMode>()
            .map_err(|e| ConfigError::InvalidEnvVar("DEPLOYMENT_MODE".to_owned(), e))?;

        let stripe = StripeConfig {
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
            webhook_secret_dev: get_optional_env("STRIPE_WEBHOOK_SECRET_DEV").map(SecretString::from),
        };
        let easypost = EasyPostConfig {
            api_key: get_validated_secret("EASYPOST_API_KEY")?,
        };
        let email = EmailConfig {
            api_key: get_validated_secret("RESEND_API_KEY")?,
            from_address: get_required_env("FROM_EMAIL")?,
        };
        let checkout = CheckoutConfig {
            debounce: Duration::from_millis(parse_env_or("CHECKOUT_DEBOUNCE_MS", 1000)?),
            http_timeout: Duration::from_secs(parse_env_or("HTTP_TIMEOUT_SECS", 10)?),
            ..CheckoutConfig::default()
        };
        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            mode,
            stripe,
            easypost,
            email,
            checkout,
            sentry_dsn,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_owned()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse a numeric environment variable, falling back to a default.
fn parse_env_or(key: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_owned(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Reject secrets that are obviously placeholders.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_owned(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }
    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
