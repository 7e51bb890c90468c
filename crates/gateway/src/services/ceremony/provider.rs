//! The narrow seam between the ceremony engine and a public-key library.

use serde_json::Value;
use thiserror::Error;

use portcullis_core::{Credential, User};

/// A challenge for the browser plus the context needed to verify its answer.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Sent to the client unmodified.
    pub options: Value,
    /// Kept server-side in the session's ceremony slot.
    pub state: Value,
}

/// Failures reported by a [`CeremonyProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The client's payload could not be parsed.
    #[error("malformed ceremony payload: {0}")]
    Malformed(String),

    /// The payload parsed but did not verify.
    #[error("ceremony verification failed: {0}")]
    Rejected(String),

    /// The library itself failed.
    #[error("ceremony provider error: {0}")]
    Internal(String),
}

/// Challenge generation and response verification, treated as a black box.
///
/// Implementations are synchronous: challenge creation and signature checks
/// are CPU-bound and fast.
pub trait CeremonyProvider: Send + Sync + 'static {
    /// Create a credential-creation challenge for `user`, excluding the
    /// credentials the user already has.
    fn begin_registration(&self, user: &User) -> Result<Challenge, ProviderError>;

    /// Verify a credential-creation response against the stored context.
    fn finish_registration(&self, state: &Value, response: &Value)
    -> Result<Credential, ProviderError>;

    /// Create an assertion challenge scoped to `user`'s credentials, or a
    /// username-less (discoverable) challenge when `user` is `None`.
    fn begin_login(&self, user: Option<&User>) -> Result<Challenge, ProviderError>;

    /// Verify an assertion for `user` against the stored context.
    fn finish_login(&self, state: &Value, response: &Value, user: &User)
    -> Result<(), ProviderError>;
}
