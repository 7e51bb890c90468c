//! Public-key credential records.
//!
//! The gateway never interprets credential material itself; the ceremony
//! provider serializes whatever it needs into [`StoredPasskey`] and reads it
//! back during login verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential identifier as returned by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebAuthnCredentialId(Vec<u8>);

impl WebAuthnCredentialId {
    /// Create a new credential ID.
    #[must_use]
    pub const fn new(id: Vec<u8>) -> Self {
        Self(id)
    }

    /// Get the credential ID as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for WebAuthnCredentialId {
    fn from(id: Vec<u8>) -> Self {
        Self(id)
    }
}

/// Serialized passkey, opaque to everything but the ceremony provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredPasskey(serde_json::Value);

impl StoredPasskey {
    /// Wrap serialized passkey data.
    #[must_use]
    pub const fn new(data: serde_json::Value) -> Self {
        Self(data)
    }

    /// Borrow the serialized passkey data.
    #[must_use]
    pub const fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// A public-key credential bound to a user.
///
/// Created when a registration ceremony completes; only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Authenticator-assigned credential id.
    pub id: WebAuthnCredentialId,
    /// Provider-specific key material.
    pub passkey: StoredPasskey,
    /// When the credential was registered.
    pub created_at: DateTime<Utc>,
}
