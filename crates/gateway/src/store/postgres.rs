//! `PostgreSQL` store.
//!
//! Queries are checked at runtime (`query_as::<_, Row>`) so building the
//! gateway never needs a live database. Nested values are stored as JSONB.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use uuid::Uuid;

use portcullis_core::{
    Credential, Glob, Host, ProxyKind, Session, SessionId, SessionState, User, UserId, Username,
};

use super::{Store, StoreError};

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: Option<Uuid>,
    state: String,
    data: Json<BTreeMap<String, String>>,
    ceremony: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let state: SessionState = row
            .state
            .parse()
            .map_err(|e| StoreError::DataCorruption(format!("session {}: {e}", row.id)))?;

        Ok(Self {
            id: SessionId::new(row.id),
            user_id: row.user_id.map(UserId::from_uuid),
            created_at: row.created_at,
            last_seen: row.last_seen,
            expires_at: row.expires_at,
            values: row.data.0,
            ceremony: row.ceremony,
            state,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    registered: bool,
    admin: bool,
    credentials: Json<Vec<Credential>>,
    accessible_hosts: Vec<String>,
    created_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let name = Username::parse(&row.name).map_err(|e| {
            StoreError::DataCorruption(format!("invalid username in database: {e}"))
        })?;

        Ok(Self {
            id: UserId::from_uuid(row.id),
            name,
            registered: row.registered,
            admin: row.admin,
            created_at: row.created_at,
            last_seen: row.last_seen,
            credentials: row.credentials.0,
            accessible_hosts: row.accessible_hosts,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HostRow {
    hostname: String,
    backend: Option<String>,
    kind: String,
    public: bool,
    globs: Vec<String>,
}

impl TryFrom<HostRow> for Host {
    type Error = StoreError;

    fn try_from(row: HostRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "http" => ProxyKind::Http,
            other => {
                return Err(StoreError::DataCorruption(format!(
                    "host {}: unknown proxy type {other}",
                    row.hostname
                )));
            }
        };

        let globs = row
            .globs
            .iter()
            .map(|g| Glob::new(g))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::DataCorruption(format!("host {}: {e}", row.hostname)))?;

        Ok(Self {
            hostname: row.hostname,
            backend: row.backend,
            kind,
            public: row.public,
            globs,
        })
    }
}

const fn kind_name(kind: ProxyKind) -> &'static str {
    match kind {
        ProxyKind::Http => "http",
    }
}

fn glob_strings(host: &Host) -> Vec<String> {
    host.globs.iter().map(|g| g.as_str().to_owned()).collect()
}

fn map_unique_violation(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::Conflict(format!("{what} already exists"));
    }
    StoreError::Database(e)
}

// =============================================================================
// Store
// =============================================================================

/// Store backed by a `PostgreSQL` connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a connection pool with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the connection cannot be established.
    pub async fn connect(database_url: &SecretString) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url.expose_secret())
            .await?;
        Ok(Self { pool })
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails to apply.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r"
            SELECT id, user_id, state, data, ceremony, created_at, last_seen, expires_at
            FROM portcullis.session
            WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO portcullis.session
                (id, user_id, state, data, ceremony, created_at, last_seen, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                state = EXCLUDED.state,
                data = EXCLUDED.data,
                ceremony = EXCLUDED.ceremony,
                last_seen = EXCLUDED.last_seen,
                expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(session.id.as_str())
        .bind(session.user_id.map(|id| id.as_uuid()))
        .bind(session.state.to_string())
        .bind(Json(&session.values))
        .bind(session.ceremony.as_ref())
        .bind(session.created_at)
        .bind(session.last_seen)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM portcullis.session WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, name, registered, admin, credentials, accessible_hosts,
                   created_at, last_seen
            FROM portcullis.app_user
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_user_by_name(&self, name: &Username) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, name, registered, admin, credentials, accessible_hosts,
                   created_at, last_seen
            FROM portcullis.app_user
            WHERE name = $1
            ",
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, name, registered, admin, credentials, accessible_hosts,
                   created_at, last_seen
            FROM portcullis.app_user
            ORDER BY created_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO portcullis.app_user
                (id, name, registered, admin, credentials, accessible_hosts, created_at, last_seen)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(user.id.as_uuid())
        .bind(user.name.as_str())
        .bind(user.registered)
        .bind(user.admin)
        .bind(Json(&user.credentials))
        .bind(&user.accessible_hosts)
        .bind(user.created_at)
        .bind(user.last_seen)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "username"))?;

        Ok(())
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO portcullis.app_user
                (id, name, registered, admin, credentials, accessible_hosts, created_at, last_seen)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                registered = EXCLUDED.registered,
                admin = EXCLUDED.admin,
                credentials = EXCLUDED.credentials,
                accessible_hosts = EXCLUDED.accessible_hosts,
                last_seen = EXCLUDED.last_seen
            ",
        )
        .bind(user.id.as_uuid())
        .bind(user.name.as_str())
        .bind(user.registered)
        .bind(user.admin)
        .bind(Json(&user.credentials))
        .bind(&user.accessible_hosts)
        .bind(user.created_at)
        .bind(user.last_seen)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "username"))?;

        Ok(())
    }

    async fn get_host(&self, hostname: &str) -> Result<Option<Host>, StoreError> {
        let row = sqlx::query_as::<_, HostRow>(
            r"
            SELECT hostname, backend, kind, public, globs
            FROM portcullis.host
            WHERE hostname = $1
            ",
        )
        .bind(hostname)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        let rows = sqlx::query_as::<_, HostRow>(
            r"
            SELECT hostname, backend, kind, public, globs
            FROM portcullis.host
            ORDER BY hostname ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_host(&self, host: &Host) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO portcullis.host (hostname, backend, kind, public, globs)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (hostname) DO UPDATE SET
                backend = EXCLUDED.backend,
                kind = EXCLUDED.kind,
                public = EXCLUDED.public,
                globs = EXCLUDED.globs,
                updated_at = NOW()
            ",
        )
        .bind(&host.hostname)
        .bind(host.backend.as_deref())
        .bind(kind_name(host.kind))
        .bind(host.public)
        .bind(glob_strings(host))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_host_if_absent(&self, host: &Host) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO portcullis.host (hostname, backend, kind, public, globs)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (hostname) DO NOTHING
            ",
        )
        .bind(&host.hostname)
        .bind(host.backend.as_deref())
        .bind(kind_name(host.kind))
        .bind(host.public)
        .bind(glob_strings(host))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_host(&self, hostname: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM portcullis.host WHERE hostname = $1")
            .bind(hostname)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    async fn get_flag(&self, key: &str) -> Result<bool, StoreError> {
        let value: Option<bool> =
            sqlx::query_scalar("SELECT value FROM portcullis.flag WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.unwrap_or(false))
    }

    async fn set_flag(&self, key: &str, value: bool) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO portcullis.flag (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
