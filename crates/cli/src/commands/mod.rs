//! Command implementations.

pub mod host;
pub mod migrate;
pub mod token;
pub mod user;

use secrecy::SecretString;
use thiserror::Error;

use portcullis_core::{GlobError, HostError, UsernameError};
use portcullis_gateway::config::ConfigError;
use portcullis_gateway::services::TokenError;
use portcullis_gateway::store::{PgStore, StoreError};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(&'static str, String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid host: {0}")]
    Host(#[from] HostError),

    #[error("Invalid glob: {0}")]
    Glob(#[from] GlobError),

    #[error("Invalid username: {0}")]
    Username(#[from] UsernameError),

    #[error("No user named {0}")]
    UnknownUser(String),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read a required variable, honouring `.env`.
fn required_env(key: &'static str) -> Result<String, CliError> {
    dotenvy::dotenv().ok();
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(CliError::MissingEnvVar(key))
}

/// Connect to the database named by `PORTCULLIS_DATABASE_URL` or
/// `DATABASE_URL`.
async fn connect() -> Result<PgStore, CliError> {
    let url = required_env("PORTCULLIS_DATABASE_URL").or_else(|_| required_env("DATABASE_URL"))?;
    tracing::info!("Connecting to database...");
    Ok(PgStore::connect(&SecretString::from(url)).await?)
}
