//! User administration.

use portcullis_core::{User, Username, normalize_hostname, toggle_admin, toggle_host};
use portcullis_gateway::store::{PgStore, Store};

use super::{CliError, connect};

/// Print every user, one per line.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
#[allow(clippy::print_stdout)]
pub async fn list() -> Result<(), CliError> {
    let store = connect().await?;
    let users = store.list_users().await?;

    if users.is_empty() {
        tracing::info!("No users registered");
        return Ok(());
    }

    for user in users {
        println!(
            "{}\t{}\t{}\tpasskeys={}\thosts={}",
            user.name,
            if user.registered { "registered" } else { "pending" },
            if user.admin { "admin" } else { "user" },
            user.credentials.len(),
            user.accessible_hosts.join(","),
        );
    }
    Ok(())
}

/// Grant a host to a user, or revoke it if already granted.
///
/// # Errors
///
/// Returns an error if the user does not exist or the database is
/// unreachable.
pub async fn toggle_host_access(username: &str, hostname: &str) -> Result<(), CliError> {
    let store = connect().await?;
    let mut user = find_user(&store, username).await?;

    let hostname = normalize_hostname(hostname);
    let granted = toggle_host(&mut user, &hostname);
    store.save_user(&user).await?;

    tracing::info!(
        username = %user.name,
        hostname = %hostname,
        granted,
        "Host access toggled"
    );
    Ok(())
}

/// Flip a user's administrator flag.
///
/// # Errors
///
/// Returns an error if the user does not exist or the database is
/// unreachable.
pub async fn toggle_admin_flag(username: &str) -> Result<(), CliError> {
    let store = connect().await?;
    let mut user = find_user(&store, username).await?;

    let admin = toggle_admin(&mut user);
    store.save_user(&user).await?;

    tracing::info!(username = %user.name, admin, "Admin flag toggled");
    Ok(())
}

async fn find_user(store: &PgStore, username: &str) -> Result<User, CliError> {
    let name = Username::parse(username)?;
    store
        .get_user_by_name(&name)
        .await?
        .ok_or_else(|| CliError::UnknownUser(name.into_inner()))
}
