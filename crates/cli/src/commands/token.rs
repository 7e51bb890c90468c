//! Bearer token commands.
//!
//! Both commands only need `PORTCULLIS_SECRET` and `PORTCULLIS_SALT`; no
//! database connection is made.

use chrono::Duration;

use portcullis_gateway::config::TokenConfig;
use portcullis_gateway::services::{TokenCodec, TokenError};

use super::CliError;

/// Issue a token and print it.
///
/// # Errors
///
/// Returns an error if the token settings are missing or weak, or if the
/// requested ttl is not positive or exceeds the configured maximum.
#[allow(clippy::print_stdout)]
pub fn issue(subject: &str, issuer: &str, ttl_secs: Option<i64>) -> Result<(), CliError> {
    let config = TokenConfig::from_env()?;
    let ttl = match ttl_secs {
        Some(secs) if secs <= 0 => return Err(TokenError::InvalidTtl.into()),
        Some(secs) => Duration::seconds(secs),
        None => config.default_age,
    };

    let codec = TokenCodec::from_config(&config)?;
    let token = codec.issue(subject, issuer, ttl)?;

    tracing::info!(
        subject = subject,
        issuer = issuer,
        ttl_secs = ttl.num_seconds(),
        "Token issued"
    );
    println!("{token}");
    Ok(())
}

/// Validate a token and print its claims as JSON.
///
/// # Errors
///
/// Returns an error if the token does not decrypt under the configured key
/// or is outside its validity window.
#[allow(clippy::print_stdout)]
pub fn inspect(token: &str) -> Result<(), CliError> {
    let config = TokenConfig::from_env()?;
    let codec = TokenCodec::from_config(&config)?;
    let claims = codec.validate(token.trim())?;

    if let Some(expires_at) = claims.expires_at() {
        tracing::info!(subject = %claims.sub, %expires_at, "Token is valid");
    }
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}
