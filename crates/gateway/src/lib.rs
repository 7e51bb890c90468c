//! Portcullis gateway library.
//!
//! The single-sign-on gateway as a library, so the binary, the CLI and the
//! integration tests share one implementation.
//!
//! # Modules
//!
//! - [`store`] - persistence behind the `Store` trait (`PostgreSQL` and in-memory)
//! - [`services`] - sessions, ceremonies, host registry, proxy table, bearer tokens
//! - [`middleware`] - session layer, cookies, caller identity
//! - [`routes`] - login surface, forward-auth, ceremony and admin APIs, internal proxy
//! - [`config`] - environment configuration
//!
//! # Security
//!
//! Session cookies carry only an opaque id. Users, credentials and hosts stay
//! server-side and are reached through the store.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;

pub use config::GatewayConfig;
pub use error::AppError;
pub use state::AppState;
