//! Browser sessions.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SessionEvent, SessionId, SessionState, TransitionError, UserId};

/// Value-bag key holding the destination to return to after login.
pub const REDIRECT_TO_KEY: &str = "redirect_to";

/// Server-side session state keyed by an opaque cookie value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Bound user. Set when a ceremony starts (pending target) and kept once
    /// the session authenticates.
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Free-form string values (pending redirect target and similar).
    pub values: BTreeMap<String, String>,
    /// Opaque context of the single in-flight ceremony, if any.
    pub ceremony: Option<serde_json::Value>,
    pub state: SessionState,
}

impl Session {
    /// A brand new session in state `null` valid for `lifetime`.
    #[must_use]
    pub fn new(id: SessionId, now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            id,
            user_id: None,
            created_at: now,
            last_seen: now,
            expires_at: now + lifetime,
            values: BTreeMap::new(),
            ceremony: None,
            state: SessionState::Null,
        }
    }

    /// Whether the sliding window has lapsed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Record an access and slide the expiry forward.
    pub fn touch(&mut self, now: DateTime<Utc>, lifetime: Duration) {
        self.last_seen = now;
        self.expires_at = now + lifetime;
    }

    /// Push expiry into the past so the next lookup treats the id as unknown.
    pub fn force_expire(&mut self) {
        self.expires_at = DateTime::<Utc>::UNIX_EPOCH;
    }

    /// Authenticated and bound to a user.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.state.is_authenticated() && self.user_id.is_some()
    }

    /// Fire a state-machine event against this session.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] and leaves the state unchanged when the
    /// event is not accepted from the current state.
    pub fn fire(&mut self, event: SessionEvent) -> Result<(), TransitionError> {
        self.state = self.state.apply(event)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn session(now: DateTime<Utc>) -> Session {
        Session::new(SessionId::new("sid".to_string()), now, Duration::hours(1))
    }

    #[test]
    fn test_new_session_is_null_and_unexpired() {
        let now = Utc::now();
        let s = session(now);
        assert_eq!(s.state, SessionState::Null);
        assert!(!s.is_expired(now));
        assert!(s.is_expired(now + Duration::hours(1)));
        assert!(!s.is_authenticated());
    }

    #[test]
    fn test_touch_slides_expiry() {
        let now = Utc::now();
        let mut s = session(now);
        let later = now + Duration::minutes(30);
        s.touch(later, Duration::hours(1));
        assert_eq!(s.last_seen, later);
        assert_eq!(s.expires_at, later + Duration::hours(1));
    }

    #[test]
    fn test_force_expire() {
        let now = Utc::now();
        let mut s = session(now);
        s.force_expire();
        assert!(s.is_expired(now));
    }

    #[test]
    fn test_fire_rejected_event_keeps_state() {
        let mut s = session(Utc::now());
        assert!(s.fire(SessionEvent::LoginSuccess).is_err());
        assert_eq!(s.state, SessionState::Null);
        s.fire(SessionEvent::StartLogin).unwrap();
        assert_eq!(s.state, SessionState::Login);
    }
}
