//! Gateway configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PORTCULLIS_HOSTNAME` - Hostname serving the login surface (e.g., auth.example.com)
//! - `PORTCULLIS_COOKIE_SCOPE` - Parent domain for cookies (e.g., example.com)
//! - `PORTCULLIS_SECRET` - Bearer-token key material (min 32 chars, high entropy)
//! - `PORTCULLIS_SALT` - Salt for bearer-token key derivation (min 16 chars)
//!
//! ## Optional
//! - `PORTCULLIS_DISPLAY_NAME` - Relying party name shown by authenticators (default: Portcullis)
//! - `PORTCULLIS_PUBLIC_URL` - External URL of the login surface (default: https://<hostname>)
//! - `PORTCULLIS_DATABASE_URL` / `DATABASE_URL` - `PostgreSQL` connection string; in-memory store when unset
//! - `PORTCULLIS_HOST` - Bind address (default: 0.0.0.0)
//! - `PORTCULLIS_PORT` - Listen port (default: 8080)
//! - `PORTCULLIS_SESSION_LIFETIME_SECS` - Sliding session window (default: 30 days)
//! - `PORTCULLIS_SWEEP_INTERVAL_SECS` - Expired-session sweep period (default: 1 hour)
//! - `PORTCULLIS_DEFAULT_TOKEN_AGE_SECS` - Bearer token ttl when none is given (default: 30 days)
//! - `PORTCULLIS_MAX_TOKEN_AGE_SECS` - Longest bearer token ttl accepted (default: 1 year)
//! - `PORTCULLIS_ACCESS_MODEL` - `allow-list` or `globs` (default: allow-list)
//! - `PORTCULLIS_STATIC_DIR` - Login page assets (default: crates/gateway/static)
//! - `PORTCULLIS_LOG_JSON` - Emit JSON logs when set
//! - `SENTRY_DSN` - Sentry error tracking DSN
//!
//! ## Optional (TLS)
//! - `PORTCULLIS_TLS_CERT` - PEM-encoded certificate chain
//! - `PORTCULLIS_TLS_KEY` - PEM-encoded private key

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use portcullis_core::{AccessModel, normalize_hostname, within_cookie_scope};

const MIN_SECRET_LENGTH: usize = 32;
const MIN_SALT_LENGTH: usize = 16;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_SESSION_LIFETIME_SECS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: i64 = 60 * 60;
const DEFAULT_TOKEN_AGE_SECS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_MAX_TOKEN_AGE_SECS: i64 = 365 * 24 * 60 * 60;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
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

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Hostname of the login surface
    pub hostname: String,
    /// External URL of the login surface, without trailing slash
    pub public_url: String,
    /// Relying party display name
    pub display_name: String,
    /// Parent domain all session and token cookies are scoped to
    pub cookie_scope: String,
    /// `PostgreSQL` connection URL (contains password); in-memory store when absent
    pub database_url: Option<SecretString>,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Sliding session window
    pub session_lifetime: Duration,
    /// How often expired sessions are swept
    pub sweep_interval: Duration,
    /// Which mechanism grants access to private hosts
    pub access_model: AccessModel,
    /// Bearer token settings
    pub tokens: TokenConfig,
    /// Directory holding login page assets
    pub static_dir: String,
    /// Emit JSON logs instead of text
    pub log_json: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
    /// TLS configuration for HTTPS (optional)
    pub tls: Option<TlsConfig>,
}

/// Bearer token settings.
///
/// Implements `Debug` manually to redact the key material.
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: SecretString,
    pub salt: SecretString,
    /// Ttl used when a caller does not ask for one
    pub default_age: Duration,
    /// Longest ttl `issue` accepts
    pub max_age: Duration,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"[REDACTED]")
            .field("salt", &"[REDACTED]")
            .field("default_age", &self.default_age)
            .field("max_age", &self.max_age)
            .finish()
    }
}

/// TLS configuration for HTTPS.
#[derive(Clone)]
pub struct TlsConfig {
    /// PEM-encoded certificate chain
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: SecretString,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("cert_pem", &"[CERTIFICATE]")
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

impl TlsConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let cert_pem = get_optional_env("PORTCULLIS_TLS_CERT");
        let key_pem = get_optional_env("PORTCULLIS_TLS_KEY");

        match (cert_pem, key_pem) {
            (Some(cert), Some(key)) => Ok(Some(Self {
                cert_pem: cert,
                key_pem: SecretString::from(key),
            })),
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "PORTCULLIS_TLS_*".to_string(),
                "Both PORTCULLIS_TLS_CERT and PORTCULLIS_TLS_KEY must be set together"
                    .to_string(),
            )),
        }
    }
}

impl TokenConfig {
    /// Load only the bearer token settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the secret or salt is missing or weak, or a
    /// token age is not a positive number of seconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let secret = get_validated_secret("PORTCULLIS_SECRET")?;
        validate_min_length(&secret, "PORTCULLIS_SECRET", MIN_SECRET_LENGTH)?;
        let salt = SecretString::from(get_required_env("PORTCULLIS_SALT")?);
        validate_min_length(&salt, "PORTCULLIS_SALT", MIN_SALT_LENGTH)?;

        let config = Self {
            secret,
            salt,
            default_age: get_secs_or_default(
                "PORTCULLIS_DEFAULT_TOKEN_AGE_SECS",
                DEFAULT_TOKEN_AGE_SECS,
            )?,
            max_age: get_secs_or_default(
                "PORTCULLIS_MAX_TOKEN_AGE_SECS",
                DEFAULT_MAX_TOKEN_AGE_SECS,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_age > self.max_age {
            return Err(ConfigError::InvalidEnvVar(
                "PORTCULLIS_DEFAULT_TOKEN_AGE_SECS".to_string(),
                "must not exceed PORTCULLIS_MAX_TOKEN_AGE_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let hostname = normalize_hostname(&get_required_env("PORTCULLIS_HOSTNAME")?);
        let cookie_scope = get_required_env("PORTCULLIS_COOKIE_SCOPE")?
            .trim()
            .trim_start_matches('.')
            .to_ascii_lowercase();
        let public_url = get_optional_env("PORTCULLIS_PUBLIC_URL")
            .map_or_else(|| format!("https://{hostname}"), |u| u.trim_end_matches('/').to_owned());
        let display_name = get_env_or_default("PORTCULLIS_DISPLAY_NAME", "Portcullis");
        let database_url = get_optional_env("PORTCULLIS_DATABASE_URL")
            .or_else(|| get_optional_env("DATABASE_URL"))
            .map(SecretString::from);
        let host = get_env_or_default("PORTCULLIS_HOST", "0.0.0.0")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("PORTCULLIS_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("PORTCULLIS_PORT", "8080")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("PORTCULLIS_PORT".to_string(), e.to_string()))?;
        let session_lifetime = get_secs_or_default(
            "PORTCULLIS_SESSION_LIFETIME_SECS",
            DEFAULT_SESSION_LIFETIME_SECS,
        )?;
        let sweep_interval =
            get_secs_or_default("PORTCULLIS_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        let access_model = get_env_or_default("PORTCULLIS_ACCESS_MODEL", "allow-list")
            .parse::<AccessModel>()
            .map_err(|e| ConfigError::InvalidEnvVar("PORTCULLIS_ACCESS_MODEL".to_string(), e))?;
        let tokens = TokenConfig::from_env()?;
        let static_dir = get_env_or_default("PORTCULLIS_STATIC_DIR", "crates/gateway/static");
        let log_json = get_optional_env("PORTCULLIS_LOG_JSON").is_some();
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);
        let tls = TlsConfig::from_env()?;

        let config = Self {
            hostname,
            public_url,
            display_name,
            cookie_scope,
            database_url,
            host,
            port,
            session_lifetime,
            sweep_interval,
            access_model,
            tokens,
            static_dir,
            log_json,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
            tls,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the gateway hostname is not
    /// inside the cookie scope or the public URL does not parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !within_cookie_scope(&self.hostname, &self.cookie_scope) {
            return Err(ConfigError::InvalidEnvVar(
                "PORTCULLIS_HOSTNAME".to_string(),
                format!(
                    "{} must be within the cookie scope {}",
                    self.hostname, self.cookie_scope
                ),
            ));
        }
        url::Url::parse(&self.public_url).map_err(|e| {
            ConfigError::InvalidEnvVar("PORTCULLIS_PUBLIC_URL".to_string(), e.to_string())
        })?;
        self.tokens.validate()
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Where unauthenticated or unentitled callers are sent.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/", self.public_url)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Get a positive number of seconds, falling back to `default`.
fn get_secs_or_default(key: &str, default: i64) -> Result<Duration, ConfigError> {
    let Some(raw) = get_optional_env(key) else {
        return Ok(Duration::seconds(default));
    };
    parse_secs(key, &raw)
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs = raw
        .parse::<i64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if secs <= 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be a positive number of seconds".to_string(),
        ));
    }
    Duration::try_seconds(secs)
        .ok_or_else(|| ConfigError::InvalidEnvVar(key.to_string(), "out of range".to_string()))
}

/// Validate that a secret meets minimum length requirements.
fn validate_min_length(
    secret: &SecretString,
    var_name: &str,
    min: usize,
) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < min {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("must be at least {min} characters (got {})", value.len()),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
