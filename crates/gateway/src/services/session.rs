//! Session get-or-create, sliding expiry and the expiry sweep.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tokio::task::JoinHandle;

use portcullis_core::{Session, SessionId};

use crate::store::{DynStore, StoreError};

/// Bytes of randomness in a session id.
const SESSION_ID_BYTES: usize = 32;

/// Generate an unguessable session id.
#[must_use]
pub fn new_session_id() -> SessionId {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    SessionId::new(URL_SAFE_NO_PAD.encode(bytes))
}

/// Owns session lifetime: every access extends it, only the sweep deletes.
#[derive(Clone)]
pub struct SessionManager {
    store: DynStore,
    lifetime: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: DynStore, lifetime: Duration) -> Self {
        Self { store, lifetime }
    }

    /// The sliding window added on every access.
    #[must_use]
    pub const fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Load the session named by `cookie`, or mint a fresh one.
    ///
    /// A missing, unknown or expired id yields a new session in state
    /// `null`. Either way the result is touched and persisted before it is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the session cannot be loaded or saved.
    pub async fn get_or_create(&self, cookie: Option<&str>) -> Result<Session, StoreError> {
        self.get_or_create_at(cookie, Utc::now()).await
    }

    /// [`get_or_create`](Self::get_or_create) with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the session cannot be loaded or saved.
    pub async fn get_or_create_at(
        &self,
        cookie: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let existing = match cookie.filter(|c| !c.is_empty()) {
            Some(raw) => self
                .store
                .get_session(&SessionId::new(raw.to_string()))
                .await?
                .filter(|s| !s.is_expired(now)),
            None => None,
        };

        let session = match existing {
            Some(mut session) => {
                session.touch(now, self.lifetime);
                session
            }
            None => {
                let session = Session::new(new_session_id(), now, self.lifetime);
                tracing::debug!(session = ?session.id, "session minted");
                session
            }
        };

        self.store.save_session(&session).await?;
        Ok(session)
    }

    /// Delete every session that has expired by `now`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store rejects the delete.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.store.delete_expired_sessions(now).await
    }

    /// Run [`sweep`](Self::sweep) every `every` until the runtime shuts down.
    #[must_use]
    pub fn spawn_sweeper(self, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep(Utc::now()).await {
                    Ok(0) => tracing::debug!("session sweep found nothing to delete"),
                    Ok(removed) => tracing::info!(removed, "expired sessions swept"),
                    Err(e) => tracing::error!(error = %e, "session sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use portcullis_core::SessionState;

    use super::*;
    use crate::store::{MemoryStore, Store};

    fn manager() -> (SessionManager, DynStore) {
        let store: DynStore = Arc::new(MemoryStore::new());
        (SessionManager::new(store.clone(), Duration::hours(1)), store)
    }

    #[test]
    fn test_session_ids_are_unique_and_url_safe() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
        assert!(
            a.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[tokio::test]
    async fn test_no_cookie_mints_and_persists() {
        let (sessions, store) = manager();
        let s = sessions.get_or_create(None).await.unwrap();
        assert_eq!(s.state, SessionState::Null);
        assert!(store.get_session(&s.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_cookie_mints_new_id() {
        let (sessions, _) = manager();
        let s = sessions.get_or_create(Some("not-a-session")).await.unwrap();
        assert_ne!(s.id.as_str(), "not-a-session");
    }

    #[tokio::test]
    async fn test_known_cookie_slides_expiry() {
        let (sessions, store) = manager();
        let t0 = Utc::now();
        let first = sessions.get_or_create_at(None, t0).await.unwrap();

        let t1 = t0 + Duration::minutes(30);
        let again = sessions
            .get_or_create_at(Some(first.id.as_str()), t1)
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.expires_at, t1 + Duration::hours(1));
        assert_eq!(again.last_seen, t1);

        let stored = store.get_session(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.expires_at, t1 + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_expired_cookie_is_replaced() {
        let (sessions, _) = manager();
        let t0 = Utc::now();
        let first = sessions.get_or_create_at(None, t0).await.unwrap();

        let later = t0 + Duration::hours(2);
        let fresh = sessions
            .get_or_create_at(Some(first.id.as_str()), later)
            .await
            .unwrap();
        assert_ne!(fresh.id, first.id);
        assert!(fresh.expires_at > later);
    }

    #[tokio::test]
    async fn test_force_expired_session_is_replaced() {
        let (sessions, store) = manager();
        let mut s = sessions.get_or_create(None).await.unwrap();
        s.force_expire();
        store.save_session(&s).await.unwrap();

        let next = sessions.get_or_create(Some(s.id.as_str())).await.unwrap();
        assert_ne!(next.id, s.id);
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired() {
        let (sessions, store) = manager();
        let t0 = Utc::now();
        let old = sessions.get_or_create_at(None, t0).await.unwrap();
        let young = sessions
            .get_or_create_at(None, t0 + Duration::minutes(50))
            .await
            .unwrap();

        let removed = sessions.sweep(t0 + Duration::minutes(70)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_session(&old.id).await.unwrap().is_none());
        assert!(store.get_session(&young.id).await.unwrap().is_some());
    }
}
