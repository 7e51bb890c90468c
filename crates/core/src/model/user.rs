//! User accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Credential, UserId, Username};

/// A person who can authenticate with one or more passkeys.
///
/// A user with `registered == false` is the placeholder created when a
/// registration ceremony starts. It has no credentials and is never a valid
/// login target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: Username,
    pub registered: bool,
    pub admin: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub credentials: Vec<Credential>,
    /// Hostnames explicitly granted by an administrator.
    pub accessible_hosts: Vec<String>,
}

impl User {
    /// A fresh, unregistered user with a random id.
    #[must_use]
    pub fn new_pending(name: Username, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new_random(),
            name,
            registered: false,
            admin: false,
            created_at: now,
            last_seen: now,
            credentials: Vec::new(),
            accessible_hosts: Vec::new(),
        }
    }

    /// Whether a login ceremony may target this user.
    #[must_use]
    pub fn is_login_target(&self) -> bool {
        self.registered && !self.credentials.is_empty()
    }

    /// A placeholder left by a registration that never finished. Its name
    /// may be claimed by a new registration.
    #[must_use]
    pub fn is_unclaimed(&self) -> bool {
        !self.registered && self.credentials.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_user_is_not_a_login_target() {
        let name = Username::parse("alice@example.com").unwrap();
        let user = User::new_pending(name, Utc::now());
        assert!(!user.registered);
        assert!(!user.admin);
        assert!(user.credentials.is_empty());
        assert!(!user.is_login_target());
        assert!(user.is_unclaimed());
    }

    #[test]
    fn test_registered_user_is_claimed() {
        let name = Username::parse("alice@example.com").unwrap();
        let mut user = User::new_pending(name, Utc::now());
        user.registered = true;
        assert!(!user.is_unclaimed());
    }
}
