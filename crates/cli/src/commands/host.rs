//! Host administration.
//!
//! Validation uses the same cookie scope and access model the gateway is
//! configured with, read from `PORTCULLIS_COOKIE_SCOPE` and
//! `PORTCULLIS_ACCESS_MODEL`.

use portcullis_core::{AccessModel, Glob, Host, ProxyKind, normalize_hostname};
use portcullis_gateway::store::Store;

use super::{CliError, connect, required_env};

/// Print every host, one per line.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
#[allow(clippy::print_stdout)]
pub async fn list() -> Result<(), CliError> {
    let store = connect().await?;
    let hosts = store.list_hosts().await?;

    if hosts.is_empty() {
        tracing::info!("No hosts configured");
        return Ok(());
    }

    for host in hosts {
        let globs: Vec<&str> = host.globs.iter().map(Glob::as_str).collect();
        println!(
            "{}\t{}\t{}\t{}",
            host.hostname,
            host.backend.as_deref().unwrap_or("-"),
            if host.public { "public" } else { "private" },
            globs.join(","),
        );
    }
    Ok(())
}

/// Validate and store a host, replacing any host with the same name.
///
/// # Errors
///
/// Returns an error if a glob or the host fails validation, or if the
/// database is unreachable.
pub async fn add(
    hostname: &str,
    backend: &str,
    public: bool,
    globs: &[String],
) -> Result<(), CliError> {
    let cookie_scope = required_env("PORTCULLIS_COOKIE_SCOPE")?
        .trim()
        .trim_start_matches('.')
        .to_ascii_lowercase();
    let access_model = access_model()?;

    let host = Host {
        hostname: normalize_hostname(hostname),
        backend: Some(backend.trim().to_owned()),
        kind: ProxyKind::Http,
        public,
        globs: globs
            .iter()
            .map(|g| Glob::new(g))
            .collect::<Result<_, _>>()?,
    };
    host.validate(&cookie_scope, access_model)?;

    let store = connect().await?;
    store.save_host(&host).await?;

    tracing::info!(
        hostname = %host.hostname,
        backend = backend,
        public = host.public,
        "Host saved"
    );
    Ok(())
}

/// Remove a host.
///
/// # Errors
///
/// Returns an error if the host does not exist or the database is
/// unreachable.
pub async fn delete(hostname: &str) -> Result<(), CliError> {
    let hostname = normalize_hostname(hostname);
    let store = connect().await?;
    store.delete_host(&hostname).await?;

    tracing::info!(hostname = %hostname, "Host deleted");
    Ok(())
}

fn access_model() -> Result<AccessModel, CliError> {
    std::env::var("PORTCULLIS_ACCESS_MODEL").map_or(Ok(AccessModel::default()), |raw| {
        raw.parse()
            .map_err(|e| CliError::InvalidEnvVar("PORTCULLIS_ACCESS_MODEL", e))
    })
}
