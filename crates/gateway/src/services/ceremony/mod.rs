//! Passkey registration and login ceremonies.
//!
//! Every operation is gated by the session state machine before anything
//! else happens; a request from the wrong state is a client error and
//! changes nothing. Once past the gate, finish operations always clear the
//! session's ceremony slot, whether they succeed or not.
//!
//! Operations take the request's [`Session`] by `&mut` and persist it
//! before returning. On error the caller's copy reflects exactly what was
//! persisted (or nothing, for start operations).

pub mod provider;
pub mod webauthn;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use portcullis_core::{
    REDIRECT_TO_KEY, Session, SessionEvent, SessionState, TransitionError, User, UserId,
    Username, UsernameError,
};

pub use provider::{CeremonyProvider, Challenge, ProviderError};
pub use webauthn::{WebauthnConfigError, WebauthnProvider};

use crate::store::{ADMIN_REGISTERED_FLAG, DynStore, StoreError};

/// Errors that can occur during a ceremony.
#[derive(Debug, Error)]
pub enum CeremonyError {
    /// The session is not in the state this operation starts from.
    #[error(transparent)]
    WrongState(#[from] TransitionError),

    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    #[error("user not found")]
    UnknownUser,

    #[error("user already exists")]
    UserExists,

    #[error("no ceremony in progress")]
    NoCeremony,

    #[error("malformed ceremony payload: {0}")]
    Malformed(String),

    /// The response did not verify.
    #[error("verification failed")]
    VerificationFailed(String),

    #[error("ceremony provider error: {0}")]
    Provider(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ProviderError> for CeremonyError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Malformed(m) => Self::Malformed(m),
            ProviderError::Rejected(m) => Self::VerificationFailed(m),
            ProviderError::Internal(m) => Self::Provider(m),
        }
    }
}

impl CeremonyError {
    /// Errors the caller can fix by changing the request.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::WrongState(_)
                | Self::InvalidUsername(_)
                | Self::UnknownUser
                | Self::UserExists
                | Self::NoCeremony
                | Self::Malformed(_)
        )
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub user_id: UserId,
    pub username: Username,
    /// Pending destination consumed from the session, if one was stashed.
    pub redirect: Option<String>,
}

/// Orchestrates ceremonies between the session, the store and a provider.
#[derive(Clone)]
pub struct CeremonyEngine {
    store: DynStore,
    provider: Arc<dyn CeremonyProvider>,
}

fn gate(session: &Session, event: SessionEvent) -> Result<(), TransitionError> {
    session.state.apply(event).map(|_| ())
}

/// Recover the user id a discoverable credential carries as its user handle.
fn user_handle(response: &Value) -> Result<UserId, CeremonyError> {
    let handle = response
        .pointer("/response/userHandle")
        .and_then(Value::as_str)
        .ok_or_else(|| CeremonyError::Malformed("credential carries no user handle".to_owned()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(handle.trim_end_matches('='))
        .map_err(|e| CeremonyError::Malformed(format!("user handle: {e}")))?;
    UserId::from_slice(&bytes).map_err(|e| CeremonyError::Malformed(format!("user handle: {e}")))
}

impl CeremonyEngine {
    #[must_use]
    pub fn new(store: DynStore, provider: Arc<dyn CeremonyProvider>) -> Self {
        Self { store, provider }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Begin registering a new user called `username`.
    ///
    /// A session left in `registration` by an abandoned attempt is closed
    /// first. Returns the challenge for the browser.
    ///
    /// # Errors
    ///
    /// Client errors for a wrong state, an invalid or taken username;
    /// internal errors if the provider or the store fails. The session is
    /// untouched on error. A placeholder user written before a failed
    /// session save stays unclaimed and is reused by the next attempt.
    pub async fn start_registration(
        &self,
        session: &mut Session,
        username: &str,
    ) -> Result<Value, CeremonyError> {
        let mut next = session.clone();
        if next.state == SessionState::Registration {
            tracing::debug!("closing abandoned registration");
            next.fire(SessionEvent::FinishRegistration)?;
            next.ceremony = None;
            next.user_id = None;
        }
        gate(&next, SessionEvent::StartRegistration)?;

        let name = Username::parse(username)?;
        let (user, reclaimed) = match self.store.get_user_by_name(&name).await? {
            Some(existing) if existing.is_unclaimed() => (existing, true),
            Some(_) => return Err(CeremonyError::UserExists),
            None => (User::new_pending(name, Utc::now()), false),
        };

        let challenge = self.provider.begin_registration(&user)?;
        if reclaimed {
            tracing::debug!(user = %user.name, "reclaiming unfinished registration");
        } else {
            self.store.insert_user(&user).await.map_err(|e| match e {
                StoreError::Conflict(_) => CeremonyError::UserExists,
                other => CeremonyError::Store(other),
            })?;
        }

        next.ceremony = Some(challenge.state);
        next.user_id = Some(user.id);
        next.fire(SessionEvent::StartRegistration)?;
        self.store.save_session(&next).await?;
        *session = next;

        tracing::info!(user = %user.name, "registration started");
        Ok(challenge.options)
    }

    /// Complete a registration with the browser's credential.
    ///
    /// The first user to complete registration becomes an administrator.
    ///
    /// # Errors
    ///
    /// A client error, with nothing changed, if the session is not in
    /// `registration`. Otherwise the ceremony slot is cleared even on
    /// failure; verification failures leave the state in `registration`.
    pub async fn finish_registration(
        &self,
        session: &mut Session,
        response: &Value,
    ) -> Result<(), CeremonyError> {
        gate(session, SessionEvent::FinishRegistration)?;

        let ceremony = session.ceremony.take();
        let result = self
            .complete_registration(session.user_id, ceremony, response)
            .await;

        match result {
            Ok(user) => {
                session.fire(SessionEvent::FinishRegistration)?;
                session.user_id = None;
                self.store.save_session(session).await?;
                tracing::info!(user = %user.name, admin = user.admin, "registration finished");
                Ok(())
            }
            Err(e) => {
                self.persist_after_failure(session).await;
                tracing::warn!(error = %e, "registration failed");
                Err(e)
            }
        }
    }

    async fn complete_registration(
        &self,
        user_id: Option<UserId>,
        ceremony: Option<Value>,
        response: &Value,
    ) -> Result<User, CeremonyError> {
        let state = ceremony.ok_or(CeremonyError::NoCeremony)?;
        let user_id = user_id.ok_or(CeremonyError::NoCeremony)?;
        let mut user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(CeremonyError::UnknownUser)?;
        // Another session claimed the name first.
        if user.registered {
            return Err(CeremonyError::UserExists);
        }

        let credential = self.provider.finish_registration(&state, response)?;

        // Read-then-write: two first registrations racing here can both win.
        let bootstrap_admin = !self.store.get_flag(ADMIN_REGISTERED_FLAG).await?;

        user.credentials.push(credential);
        user.registered = true;
        user.last_seen = Utc::now();
        if bootstrap_admin {
            user.admin = true;
        }
        self.store.save_user(&user).await?;

        if bootstrap_admin {
            self.store.set_flag(ADMIN_REGISTERED_FLAG, true).await?;
            tracing::info!(user = %user.name, "first registration, granted administrator");
        }

        Ok(user)
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Begin a login ceremony.
    ///
    /// With a username the challenge is scoped to that user's credentials;
    /// without one it is discoverable and the credential names the user. A
    /// session left in `login` by an abandoned attempt is failed first.
    ///
    /// # Errors
    ///
    /// Client errors for a wrong state or an unknown username; internal
    /// errors if the provider or the store fails. Nothing is persisted on
    /// error.
    pub async fn start_login(
        &self,
        session: &mut Session,
        username: Option<&str>,
    ) -> Result<Value, CeremonyError> {
        let mut next = session.clone();
        if next.state == SessionState::Login {
            tracing::debug!("closing abandoned login");
            next.fire(SessionEvent::LoginFail)?;
            next.ceremony = None;
            next.user_id = None;
        }
        gate(&next, SessionEvent::StartLogin)?;

        let (challenge, target) = match username.map(str::trim).filter(|u| !u.is_empty()) {
            Some(username) => {
                let name = Username::parse(username).map_err(|_| CeremonyError::UnknownUser)?;
                let user = self
                    .store
                    .get_user_by_name(&name)
                    .await?
                    .filter(User::is_login_target)
                    .ok_or(CeremonyError::UnknownUser)?;
                (self.provider.begin_login(Some(&user))?, Some(user.id))
            }
            None => (self.provider.begin_login(None)?, None),
        };

        next.ceremony = Some(challenge.state);
        next.user_id = target;
        next.fire(SessionEvent::StartLogin)?;
        self.store.save_session(&next).await?;
        *session = next;

        tracing::info!(discoverable = target.is_none(), "login started");
        Ok(challenge.options)
    }

    /// Verify the browser's assertion and bind the session to the user.
    ///
    /// # Errors
    ///
    /// A client error, with nothing changed, if the session is not in
    /// `login`. Otherwise the ceremony slot is cleared even on failure; a
    /// failed verification is `VerificationFailed` and fires no transition.
    pub async fn finish_login(
        &self,
        session: &mut Session,
        response: &Value,
    ) -> Result<LoginOutcome, CeremonyError> {
        gate(session, SessionEvent::LoginSuccess)?;

        let ceremony = session.ceremony.take();
        let result = self
            .verify_login(session.user_id, ceremony, response)
            .await;

        match result {
            Ok(mut user) => {
                user.last_seen = Utc::now();
                self.store.save_user(&user).await?;

                session.fire(SessionEvent::LoginSuccess)?;
                session.user_id = Some(user.id);
                let redirect = session.values.remove(REDIRECT_TO_KEY);
                self.store.save_session(session).await?;

                tracing::info!(user = %user.name, "login succeeded");
                Ok(LoginOutcome {
                    user_id: user.id,
                    username: user.name,
                    redirect,
                })
            }
            Err(e) => {
                self.persist_after_failure(session).await;
                tracing::warn!(error = %e, "login failed");
                Err(e)
            }
        }
    }

    async fn verify_login(
        &self,
        target: Option<UserId>,
        ceremony: Option<Value>,
        response: &Value,
    ) -> Result<User, CeremonyError> {
        let state = ceremony.ok_or(CeremonyError::NoCeremony)?;
        let user_id = match target {
            Some(id) => id,
            None => user_handle(response)?,
        };
        let user = self
            .store
            .get_user(user_id)
            .await?
            .filter(User::is_login_target)
            .ok_or(CeremonyError::UnknownUser)?;

        self.provider.finish_login(&state, response, &user)?;
        Ok(user)
    }

    // =========================================================================
    // Additional credentials
    // =========================================================================

    /// Begin adding another passkey to the authenticated user.
    ///
    /// # Errors
    ///
    /// Client errors if the session is not authenticated or its user is
    /// gone; internal errors if the provider or the store fails.
    pub async fn start_add_credential(
        &self,
        session: &mut Session,
    ) -> Result<Value, CeremonyError> {
        let mut next = session.clone();
        if next.state == SessionState::AuthRegistration {
            tracing::debug!("closing abandoned credential addition");
            next.fire(SessionEvent::FinishAuthRegistration)?;
            next.ceremony = None;
        }
        gate(&next, SessionEvent::AddRegistration)?;

        let user_id = next.user_id.ok_or(CeremonyError::UnknownUser)?;
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(CeremonyError::UnknownUser)?;
        let challenge = self.provider.begin_registration(&user)?;

        next.ceremony = Some(challenge.state);
        next.fire(SessionEvent::AddRegistration)?;
        self.store.save_session(&next).await?;
        *session = next;

        tracing::info!(user = %user.name, "credential addition started");
        Ok(challenge.options)
    }

    /// Attach the new passkey and return to `authenticated`.
    ///
    /// # Errors
    ///
    /// A client error, with nothing changed, if the session is not in
    /// `authRegistration`. Otherwise the ceremony slot is cleared even on
    /// failure.
    pub async fn finish_add_credential(
        &self,
        session: &mut Session,
        response: &Value,
    ) -> Result<(), CeremonyError> {
        gate(session, SessionEvent::FinishAuthRegistration)?;

        let ceremony = session.ceremony.take();
        let result = self
            .attach_credential(session.user_id, ceremony, response)
            .await;

        match result {
            Ok(user) => {
                session.fire(SessionEvent::FinishAuthRegistration)?;
                self.store.save_session(session).await?;
                tracing::info!(
                    user = %user.name,
                    credentials = user.credentials.len(),
                    "credential added"
                );
                Ok(())
            }
            Err(e) => {
                self.persist_after_failure(session).await;
                tracing::warn!(error = %e, "credential addition failed");
                Err(e)
            }
        }
    }

    async fn attach_credential(
        &self,
        user_id: Option<UserId>,
        ceremony: Option<Value>,
        response: &Value,
    ) -> Result<User, CeremonyError> {
        let state = ceremony.ok_or(CeremonyError::NoCeremony)?;
        let user_id = user_id.ok_or(CeremonyError::UnknownUser)?;
        let mut user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(CeremonyError::UnknownUser)?;

        let credential = self.provider.finish_registration(&state, response)?;
        user.credentials.push(credential);
        self.store.save_user(&user).await?;
        Ok(user)
    }

    // =========================================================================
    // Logout
    // =========================================================================

    /// End the session.
    ///
    /// The record is not deleted; its expiry is pushed into the past so the
    /// next request mints a replacement, and the sweep removes it later.
    ///
    /// # Errors
    ///
    /// Returns `CeremonyError::Store` if the session cannot be persisted.
    pub async fn logout(&self, session: &mut Session) -> Result<(), CeremonyError> {
        if session.state == SessionState::AuthRegistration {
            session.fire(SessionEvent::FinishAuthRegistration)?;
        }
        if session.state == SessionState::Authenticated {
            session.fire(SessionEvent::Logout)?;
        }
        session.ceremony = None;
        session.user_id = None;
        session.force_expire();
        self.store.save_session(session).await?;

        tracing::info!("session logged out");
        Ok(())
    }

    async fn persist_after_failure(&self, session: &Session) {
        if let Err(e) = self.store.save_session(session).await {
            tracing::error!(error = %e, "failed to persist session after ceremony failure");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::{DateTime, Duration};
    use serde_json::json;

    use portcullis_core::{Host, SessionId};

    use super::fake::FakeCeremony;
    use super::*;
    use crate::store::{MemoryStore, Store};

    struct Harness {
        store: DynStore,
        engine: CeremonyEngine,
    }

    fn harness() -> Harness {
        let store: DynStore = Arc::new(MemoryStore::new());
        let engine = CeremonyEngine::new(store.clone(), Arc::new(FakeCeremony));
        Harness { store, engine }
    }

    fn session() -> Session {
        Session::new(
            SessionId::new(uuid::Uuid::new_v4().to_string()),
            Utc::now(),
            Duration::hours(1),
        )
    }

    impl Harness {
        async fn register(&self, name: &str, cred: &str) -> User {
            let mut s = session();
            let options = self.engine.start_registration(&mut s, name).await.unwrap();
            let response = FakeCeremony::registration_response(&options, cred);
            self.engine.finish_registration(&mut s, &response).await.unwrap();
            self.store
                .get_user_by_name(&Username::parse(name).unwrap())
                .await
                .unwrap()
                .unwrap()
        }

        async fn login(&self, s: &mut Session, name: &str, cred: &str) -> LoginOutcome {
            let options = self.engine.start_login(s, Some(name)).await.unwrap();
            let response = FakeCeremony::login_response(&options, cred, None);
            self.engine.finish_login(s, &response).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_first_registrant_becomes_admin_second_does_not() {
        let h = harness();

        let alice = h.register("alice@example.com", "cred-a").await;
        assert!(alice.admin);
        assert!(alice.registered);
        assert_eq!(alice.credentials.len(), 1);

        let bob = h.register("bob@example.com", "cred-b").await;
        assert!(!bob.admin);
        assert!(bob.registered);

        assert!(h.store.get_flag(ADMIN_REGISTERED_FLAG).await.unwrap());
    }

    #[tokio::test]
    async fn test_registration_finish_returns_to_null() {
        let h = harness();
        let mut s = session();
        let options = h.engine.start_registration(&mut s, "alice").await.unwrap();
        assert_eq!(s.state, SessionState::Registration);
        assert!(s.ceremony.is_some());

        let response = FakeCeremony::registration_response(&options, "cred-a");
        h.engine.finish_registration(&mut s, &response).await.unwrap();
        assert_eq!(s.state, SessionState::Null);
        assert!(s.ceremony.is_none());

        let stored = h.store.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Null);
    }

    #[tokio::test]
    async fn test_registration_rejects_existing_username() {
        let h = harness();
        h.register("alice", "cred-a").await;

        let mut s = session();
        let err = h.engine.start_registration(&mut s, "alice").await.unwrap_err();
        assert!(matches!(err, CeremonyError::UserExists));
        assert_eq!(s.state, SessionState::Null);
        assert!(h.store.get_session(&s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_registration_is_auto_closed() {
        let h = harness();
        let mut s = session();
        h.engine.start_registration(&mut s, "first").await.unwrap();
        let options = h.engine.start_registration(&mut s, "second").await.unwrap();
        assert_eq!(s.state, SessionState::Registration);

        let response = FakeCeremony::registration_response(&options, "cred-2");
        h.engine.finish_registration(&mut s, &response).await.unwrap();
        let second = h
            .store
            .get_user_by_name(&Username::parse("second").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(second.registered);
    }

    #[tokio::test]
    async fn test_unfinished_registration_can_be_retried() {
        let h = harness();
        let mut s = session();
        h.engine.start_registration(&mut s, "bob").await.unwrap();

        // Same session, retrying after the prompt was dismissed
        h.engine.start_registration(&mut s, "bob").await.unwrap();

        // A fresh session finishes the registration
        let mut other = session();
        let options = h.engine.start_registration(&mut other, "bob").await.unwrap();
        let response = FakeCeremony::registration_response(&options, "cred-b");
        h.engine.finish_registration(&mut other, &response).await.unwrap();

        let users = h.store.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert!(users.first().unwrap().registered);
    }

    #[tokio::test]
    async fn test_losing_a_registration_race_is_rejected() {
        let h = harness();
        let mut slow = session();
        let slow_options = h.engine.start_registration(&mut slow, "bob").await.unwrap();
        h.register("bob", "cred-fast").await;

        let response = FakeCeremony::registration_response(&slow_options, "cred-slow");
        let err = h.engine.finish_registration(&mut slow, &response).await.unwrap_err();
        assert!(matches!(err, CeremonyError::UserExists));

        let bob = h
            .store
            .get_user_by_name(&Username::parse("bob").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob.credentials.len(), 1);
        assert_eq!(bob.credentials.first().unwrap().id.as_bytes(), b"cred-fast");
    }

    #[tokio::test]
    async fn test_failed_registration_clears_slot_and_keeps_state() {
        let h = harness();
        let mut s = session();
        h.engine.start_registration(&mut s, "alice").await.unwrap();

        let bad = json!({"challenge": "wrong", "credential_id": "cred-a"});
        let err = h.engine.finish_registration(&mut s, &bad).await.unwrap_err();
        assert!(matches!(err, CeremonyError::VerificationFailed(_)));
        assert_eq!(s.state, SessionState::Registration);
        assert!(s.ceremony.is_none());

        let stored = h.store.get_session(&s.id).await.unwrap().unwrap();
        assert!(stored.ceremony.is_none());

        let user = h
            .store
            .get_user_by_name(&Username::parse("alice").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(!user.registered);
        assert!(user.credentials.is_empty());
        assert!(!h.store.get_flag(ADMIN_REGISTERED_FLAG).await.unwrap());
    }

    #[tokio::test]
    async fn test_finish_from_wrong_state_changes_nothing() {
        let h = harness();
        let mut s = session();
        s.ceremony = Some(json!({"kind": "leftover"}));
        let before = s.clone();

        let err = h
            .engine
            .finish_registration(&mut s, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::WrongState(_)));
        assert!(err.is_client_error());
        assert_eq!(s, before);

        let err = h.engine.finish_login(&mut s, &json!({})).await.unwrap_err();
        assert!(matches!(err, CeremonyError::WrongState(_)));
        assert_eq!(s, before);

        let err = h
            .engine
            .finish_add_credential(&mut s, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::WrongState(_)));
        assert_eq!(s, before);

        assert!(h.store.get_session(&s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_named_login_consumes_redirect() {
        let h = harness();
        h.register("alice", "cred-a").await;

        let mut s = session();
        s.values.insert(
            REDIRECT_TO_KEY.to_string(),
            "https://app.example.com/dashboard".to_string(),
        );
        let outcome = h.login(&mut s, "alice", "cred-a").await;

        assert_eq!(
            outcome.redirect.as_deref(),
            Some("https://app.example.com/dashboard")
        );
        assert_eq!(s.state, SessionState::Authenticated);
        assert_eq!(s.user_id, Some(outcome.user_id));
        assert!(!s.values.contains_key(REDIRECT_TO_KEY));
        assert!(s.ceremony.is_none());
    }

    #[tokio::test]
    async fn test_login_without_pending_target_is_bare_success() {
        let h = harness();
        h.register("alice", "cred-a").await;
        let mut s = session();
        let outcome = h.login(&mut s, "alice", "cred-a").await;
        assert!(outcome.redirect.is_none());
    }

    #[tokio::test]
    async fn test_discoverable_login_resolves_user_from_handle() {
        let h = harness();
        let alice = h.register("alice", "cred-a").await;

        let mut s = session();
        let options = h.engine.start_login(&mut s, None).await.unwrap();
        assert!(s.user_id.is_none());

        let response = FakeCeremony::login_response(&options, "cred-a", Some(alice.id));
        let outcome = h.engine.finish_login(&mut s, &response).await.unwrap();
        assert_eq!(outcome.user_id, alice.id);
        assert_eq!(s.user_id, Some(alice.id));
    }

    #[tokio::test]
    async fn test_discoverable_login_without_handle_is_malformed() {
        let h = harness();
        h.register("alice", "cred-a").await;

        let mut s = session();
        let options = h.engine.start_login(&mut s, None).await.unwrap();
        let response = FakeCeremony::login_response(&options, "cred-a", None);
        let err = h.engine.finish_login(&mut s, &response).await.unwrap_err();
        assert!(matches!(err, CeremonyError::Malformed(_)));
    }

    /// Memory store whose user writes can be switched off.
    #[derive(Default)]
    struct FlakyUserWrites {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Store for FlakyUserWrites {
        async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
            self.inner.get_session(id).await
        }
        async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
            self.inner.save_session(session).await
        }
        async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.delete_expired_sessions(now).await
        }
        async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
            self.inner.get_user(id).await
        }
        async fn get_user_by_name(&self, name: &Username) -> Result<Option<User>, StoreError> {
            self.inner.get_user_by_name(name).await
        }
        async fn list_users(&self) -> Result<Vec<User>, StoreError> {
            self.inner.list_users().await
        }
        async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
            self.inner.insert_user(user).await
        }
        async fn save_user(&self, user: &User) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::DataCorruption("user writes disabled".to_owned()));
            }
            self.inner.save_user(user).await
        }
        async fn get_host(&self, hostname: &str) -> Result<Option<Host>, StoreError> {
            self.inner.get_host(hostname).await
        }
        async fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
            self.inner.list_hosts().await
        }
        async fn save_host(&self, host: &Host) -> Result<(), StoreError> {
            self.inner.save_host(host).await
        }
        async fn insert_host_if_absent(&self, host: &Host) -> Result<bool, StoreError> {
            self.inner.insert_host_if_absent(host).await
        }
        async fn delete_host(&self, hostname: &str) -> Result<(), StoreError> {
            self.inner.delete_host(hostname).await
        }
        async fn get_flag(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.get_flag(key).await
        }
        async fn set_flag(&self, key: &str, value: bool) -> Result<(), StoreError> {
            self.inner.set_flag(key, value).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_login_is_not_committed_when_user_save_fails() {
        let flaky = Arc::new(FlakyUserWrites::default());
        let store: DynStore = flaky.clone();
        let h = Harness {
            engine: CeremonyEngine::new(store.clone(), Arc::new(FakeCeremony)),
            store,
        };
        h.register("alice", "cred-a").await;

        let mut s = session();
        let options = h.engine.start_login(&mut s, Some("alice")).await.unwrap();
        let response = FakeCeremony::login_response(&options, "cred-a", None);

        flaky.fail.store(true, Ordering::SeqCst);
        let err = h.engine.finish_login(&mut s, &response).await.unwrap_err();
        assert!(matches!(err, CeremonyError::Store(_)));

        let stored = h.store.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Login);
        assert!(!stored.is_authenticated());
    }

    #[tokio::test]
    async fn test_failed_login_is_forbidden_and_stays_in_login() {
        let h = harness();
        h.register("alice", "cred-a").await;

        let mut s = session();
        let options = h.engine.start_login(&mut s, Some("alice")).await.unwrap();
        let response = FakeCeremony::login_response(&options, "someone-elses-cred", None);

        let err = h.engine.finish_login(&mut s, &response).await.unwrap_err();
        assert!(matches!(err, CeremonyError::VerificationFailed(_)));
        assert!(!err.is_client_error());
        assert_eq!(s.state, SessionState::Login);
        assert!(s.ceremony.is_none());

        // A retry starts over from the abandoned login.
        let outcome = h.login(&mut s, "alice", "cred-a").await;
        assert_eq!(s.state, SessionState::Authenticated);
        assert_eq!(outcome.username.as_str(), "alice");
    }

    #[tokio::test]
    async fn test_login_rejects_unknown_and_unregistered_users() {
        let h = harness();
        let mut s = session();
        let err = h.engine.start_login(&mut s, Some("ghost")).await.unwrap_err();
        assert!(matches!(err, CeremonyError::UnknownUser));

        let mut pending = session();
        h.engine.start_registration(&mut pending, "pending").await.unwrap();
        let err = h.engine.start_login(&mut s, Some("pending")).await.unwrap_err();
        assert!(matches!(err, CeremonyError::UnknownUser));
        assert_eq!(s.state, SessionState::Null);
    }

    #[tokio::test]
    async fn test_add_credential_round_trip() {
        let h = harness();
        h.register("alice", "cred-a").await;
        let mut s = session();
        h.login(&mut s, "alice", "cred-a").await;

        let options = h.engine.start_add_credential(&mut s).await.unwrap();
        assert_eq!(s.state, SessionState::AuthRegistration);
        assert!(s.is_authenticated());

        let response = FakeCeremony::registration_response(&options, "cred-a2");
        h.engine.finish_add_credential(&mut s, &response).await.unwrap();
        assert_eq!(s.state, SessionState::Authenticated);

        let alice = h.store.get_user(s.user_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(alice.credentials.len(), 2);
    }

    #[tokio::test]
    async fn test_add_credential_requires_authentication() {
        let h = harness();
        let mut s = session();
        let err = h.engine.start_add_credential(&mut s).await.unwrap_err();
        assert!(matches!(err, CeremonyError::WrongState(_)));
    }

    #[tokio::test]
    async fn test_logout_force_expires() {
        let h = harness();
        h.register("alice", "cred-a").await;
        let mut s = session();
        h.login(&mut s, "alice", "cred-a").await;

        h.engine.logout(&mut s).await.unwrap();
        assert_eq!(s.state, SessionState::Null);
        assert!(s.user_id.is_none());
        assert!(s.is_expired(Utc::now()));

        let stored = h.store.get_session(&s.id).await.unwrap().unwrap();
        assert!(stored.is_expired(Utc::now()));
    }
}
