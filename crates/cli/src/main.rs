//! Portcullis CLI - migrations and out-of-band administration.
//!
//! # Usage
//!
//! ```bash
//! # Apply database migrations
//! portcullis-cli migrate
//!
//! # Publish a backend
//! portcullis-cli host add --hostname app.example.com --backend http://10.0.0.5:8080
//!
//! # Grant a user access to it
//! portcullis-cli user toggle-host --username alice@example.com --hostname app.example.com
//!
//! # Issue a bearer token for a script
//! portcullis-cli token issue --subject alice@example.com --ttl-secs 3600
//! ```
//!
//! Host changes made here reach a running gateway on its next router
//! rebuild (restart, or any host change made through the admin API).

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "portcullis-cli")]
#[command(author, version, about = "Portcullis CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage published hosts
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Issue and inspect bearer tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum HostAction {
    /// List hosts
    List,
    /// Add or replace a host
    Add {
        /// Public hostname, e.g. app.example.com
        #[arg(long)]
        hostname: String,

        /// Backend URL, e.g. http://10.0.0.5:8080
        #[arg(long)]
        backend: String,

        /// Reachable without logging in
        #[arg(long)]
        public: bool,

        /// Username glob granted access (repeatable)
        #[arg(long = "glob")]
        globs: Vec<String>,
    },
    /// Delete a host
    Delete {
        #[arg(long)]
        hostname: String,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// List users
    List,
    /// Grant the host if absent, revoke it if present
    ToggleHost {
        #[arg(long)]
        username: String,
        #[arg(long)]
        hostname: String,
    },
    /// Flip the administrator flag
    ToggleAdmin {
        #[arg(long)]
        username: String,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a bearer token
    Issue {
        /// Username the token authenticates
        #[arg(long)]
        subject: String,

        #[arg(long, default_value = "portcullis-cli")]
        issuer: String,

        /// Lifetime in seconds (default: `PORTCULLIS_DEFAULT_TOKEN_AGE_SECS`)
        #[arg(long)]
        ttl_secs: Option<i64>,
    },
    /// Decrypt a token and print its claims
    Inspect {
        #[arg(long)]
        token: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portcullis_cli=info,portcullis_gateway=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Host { action } => match action {
            HostAction::List => commands::host::list().await?,
            HostAction::Add {
                hostname,
                backend,
                public,
                globs,
            } => commands::host::add(&hostname, &backend, public, &globs).await?,
            HostAction::Delete { hostname } => commands::host::delete(&hostname).await?,
        },
        Commands::User { action } => match action {
            UserAction::List => commands::user::list().await?,
            UserAction::ToggleHost { username, hostname } => {
                commands::user::toggle_host_access(&username, &hostname).await?;
            }
            UserAction::ToggleAdmin { username } => {
                commands::user::toggle_admin_flag(&username).await?;
            }
        },
        Commands::Token { action } => match action {
            TokenAction::Issue {
                subject,
                issuer,
                ttl_secs,
            } => commands::token::issue(&subject, &issuer, ttl_secs)?,
            TokenAction::Inspect { token } => commands::token::inspect(&token)?,
        },
    }
    Ok(())
}
