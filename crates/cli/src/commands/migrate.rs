//! Database migration command.

use super::{CliError, connect};

/// Apply every pending migration.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), CliError> {
    let store = connect().await?;

    tracing::info!("Running migrations...");
    store
        .migrate()
        .await
        .map_err(|e| CliError::Migration(e.to_string()))?;

    tracing::info!("Migrations complete");
    Ok(())
}
