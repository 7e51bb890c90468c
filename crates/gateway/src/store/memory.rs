//! In-memory store.
//!
//! Same semantics as [`PgStore`](super::PgStore), minus durability. Used when
//! no database URL is configured and by the test suites.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use portcullis_core::{Host, Session, SessionId, User, UserId, Username};

use super::{Store, StoreError};

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    users: HashMap<UserId, User>,
    hosts: BTreeMap<String, Host>,
    flags: HashMap<String, bool>,
}

/// Process-local store guarded by a single async `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn name_taken_by_other(users: &HashMap<UserId, User>, user: &User) -> bool {
    users
        .values()
        .any(|existing| existing.name == user.name && existing.id != user.id)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.read().await.sessions.get(id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_name(&self, name: &Username) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| &u.name == name)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.inner.read().await.users.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.users.contains_key(&user.id) || name_taken_by_other(&inner.users, user) {
            return Err(StoreError::Conflict("username already exists".to_owned()));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if name_taken_by_other(&inner.users, user) {
            return Err(StoreError::Conflict("username already exists".to_owned()));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_host(&self, hostname: &str) -> Result<Option<Host>, StoreError> {
        Ok(self.inner.read().await.hosts.get(hostname).cloned())
    }

    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        Ok(self.inner.read().await.hosts.values().cloned().collect())
    }

    async fn save_host(&self, host: &Host) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .hosts
            .insert(host.hostname.clone(), host.clone());
        Ok(())
    }

    async fn insert_host_if_absent(&self, host: &Host) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.hosts.contains_key(&host.hostname) {
            return Ok(false);
        }
        inner.hosts.insert(host.hostname.clone(), host.clone());
        Ok(true)
    }

    async fn delete_host(&self, hostname: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .hosts
            .remove(hostname)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn get_flag(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .flags
            .get(key)
            .copied()
            .unwrap_or(false))
    }

    async fn set_flag(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.inner.write().await.flags.insert(key.to_owned(), value);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::ADMIN_REGISTERED_FLAG;

    fn user(name: &str) -> User {
        User::new_pending(Username::parse(name).unwrap(), Utc::now())
    }

    #[tokio::test]
    async fn test_insert_user_rejects_duplicate_name() {
        let store = MemoryStore::new();
        store.insert_user(&user("alice")).await.unwrap();
        let err = store.insert_user(&user("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_save_user_upserts_by_id() {
        let store = MemoryStore::new();
        let mut alice = user("alice");
        store.insert_user(&alice).await.unwrap();
        alice.admin = true;
        store.save_user(&alice).await.unwrap();

        let loaded = store.get_user(alice.id).await.unwrap().unwrap();
        assert!(loaded.admin);
        let by_name = store.get_user_by_name(&alice.name).await.unwrap().unwrap();
        assert_eq!(by_name.id, alice.id);
    }

    #[tokio::test]
    async fn test_delete_expired_sessions() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let live = Session::new(SessionId::new("live".into()), now, Duration::hours(1));
        let mut dead = Session::new(SessionId::new("dead".into()), now, Duration::hours(1));
        dead.force_expire();
        store.save_session(&live).await.unwrap();
        store.save_session(&dead).await.unwrap();

        assert_eq!(store.delete_expired_sessions(now).await.unwrap(), 1);
        assert!(store.get_session(&live.id).await.unwrap().is_some());
        assert!(store.get_session(&dead.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hosts() {
        let store = MemoryStore::new();
        let host = Host::discovered("app.example.com");
        assert!(store.insert_host_if_absent(&host).await.unwrap());
        assert!(!store.insert_host_if_absent(&host).await.unwrap());
        assert_eq!(store.list_hosts().await.unwrap().len(), 1);

        store.delete_host("app.example.com").await.unwrap();
        assert!(matches!(
            store.delete_host("app.example.com").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_flags_default_false() {
        let store = MemoryStore::new();
        assert!(!store.get_flag(ADMIN_REGISTERED_FLAG).await.unwrap());
        store.set_flag(ADMIN_REGISTERED_FLAG, true).await.unwrap();
        assert!(store.get_flag(ADMIN_REGISTERED_FLAG).await.unwrap());
    }
}
