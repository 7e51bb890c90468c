//! Persistence behind a single store interface.
//!
//! Everything the gateway remembers (sessions, users, hosts and the
//! first-admin flag) goes through [`Store`]. Two implementations exist:
//!
//! - [`PgStore`] - `PostgreSQL`, used in production
//! - [`MemoryStore`] - process memory, used for development and tests
//!
//! # Migrations
//!
//! `PostgreSQL` migrations live in `crates/gateway/migrations/` and run via:
//! ```bash
//! cargo run -p portcullis-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use portcullis_core::{Host, Session, SessionId, User, UserId, Username};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Flag flipped by the first completed registration.
pub const ADMIN_REGISTERED_FLAG: &str = "admin_registered";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the store is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate username).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Shared handle to whichever store the process was started with.
pub type DynStore = Arc<dyn Store>;

/// Persistent state consumed by the gateway.
///
/// Sessions and users are read-modify-write without optimistic locking: the
/// last `save_*` wins.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Load a session by id, expired or not.
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Insert or replace a session.
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Delete every session whose expiry is at or before `now`.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn get_user_by_name(&self, name: &Username) -> Result<Option<User>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Create a user.
    ///
    /// Returns [`StoreError::Conflict`] if the name is taken.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    /// Insert or replace a user by id.
    async fn save_user(&self, user: &User) -> Result<(), StoreError>;

    async fn get_host(&self, hostname: &str) -> Result<Option<Host>, StoreError>;

    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError>;

    /// Insert or replace a host by hostname.
    async fn save_host(&self, host: &Host) -> Result<(), StoreError>;

    /// Insert a host only if the hostname is unknown. Returns whether a row
    /// was written.
    async fn insert_host_if_absent(&self, host: &Host) -> Result<bool, StoreError>;

    /// Returns [`StoreError::NotFound`] if the hostname is unknown.
    async fn delete_host(&self, hostname: &str) -> Result<(), StoreError>;

    /// Read a boolean flag. Absent flags read as `false`.
    async fn get_flag(&self, key: &str) -> Result<bool, StoreError>;

    async fn set_flag(&self, key: &str, value: bool) -> Result<(), StoreError>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}
