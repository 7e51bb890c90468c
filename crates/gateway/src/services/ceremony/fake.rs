//! Deterministic [`CeremonyProvider`] for tests.
//!
//! Challenges are random strings. A response verifies when it echoes the
//! challenge back and, for logins, names one of the user's credential ids.
//! Helpers build the matching responses so tests can drive full ceremonies
//! without a browser.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde_json::{Value, json};

use portcullis_core::{Credential, StoredPasskey, User, UserId, WebAuthnCredentialId};

use super::provider::{CeremonyProvider, Challenge, ProviderError};

/// Scripted challenge/response provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeCeremony;

impl FakeCeremony {
    /// A registration response that verifies against `options`.
    #[must_use]
    pub fn registration_response(options: &Value, credential_id: &str) -> Value {
        json!({
            "challenge": options["challenge"],
            "credential_id": credential_id,
        })
    }

    /// A login response for `credential_id` that verifies against `options`.
    ///
    /// `user_handle` is embedded the way a discoverable authenticator would.
    #[must_use]
    pub fn login_response(
        options: &Value,
        credential_id: &str,
        user_handle: Option<UserId>,
    ) -> Value {
        json!({
            "challenge": options["challenge"],
            "credential_id": credential_id,
            "response": {
                "userHandle": user_handle.map(|id| URL_SAFE_NO_PAD.encode(id.as_bytes())),
            },
        })
    }
}

fn new_challenge() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn echoed_challenge(state: &Value, response: &Value) -> Result<(), ProviderError> {
    let expected = state["challenge"]
        .as_str()
        .ok_or_else(|| ProviderError::Internal("state has no challenge".to_owned()))?;
    let got = response["challenge"]
        .as_str()
        .ok_or_else(|| ProviderError::Malformed("response has no challenge".to_owned()))?;
    if expected == got {
        Ok(())
    } else {
        Err(ProviderError::Rejected("challenge mismatch".to_owned()))
    }
}

fn credential_id(response: &Value) -> Result<&str, ProviderError> {
    response["credential_id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::Malformed("response has no credential_id".to_owned()))
}

impl CeremonyProvider for FakeCeremony {
    fn begin_registration(&self, user: &User) -> Result<Challenge, ProviderError> {
        let challenge = new_challenge();
        Ok(Challenge {
            options: json!({
                "challenge": challenge,
                "user": {"name": user.name.as_str()},
                "exclude": user.credentials.iter()
                    .map(|c| String::from_utf8_lossy(c.id.as_bytes()).into_owned())
                    .collect::<Vec<_>>(),
            }),
            state: json!({"kind": "registration", "challenge": challenge}),
        })
    }

    fn finish_registration(
        &self,
        state: &Value,
        response: &Value,
    ) -> Result<Credential, ProviderError> {
        if state["kind"] != "registration" {
            return Err(ProviderError::Internal("not a registration".to_owned()));
        }
        let id = credential_id(response)?;
        echoed_challenge(state, response)?;

        Ok(Credential {
            id: WebAuthnCredentialId::new(id.as_bytes().to_vec()),
            passkey: StoredPasskey::new(json!({"fake": id})),
            created_at: Utc::now(),
        })
    }

    fn begin_login(&self, user: Option<&User>) -> Result<Challenge, ProviderError> {
        let challenge = new_challenge();
        let kind = if user.is_some() { "login" } else { "discoverable" };
        Ok(Challenge {
            options: json!({"challenge": challenge}),
            state: json!({"kind": kind, "challenge": challenge}),
        })
    }

    fn finish_login(
        &self,
        state: &Value,
        response: &Value,
        user: &User,
    ) -> Result<(), ProviderError> {
        if !matches!(state["kind"].as_str(), Some("login" | "discoverable")) {
            return Err(ProviderError::Internal("not a login".to_owned()));
        }
        let id = credential_id(response)?;
        echoed_challenge(state, response)?;

        if user.credentials.iter().any(|c| c.id.as_bytes() == id.as_bytes()) {
            Ok(())
        } else {
            Err(ProviderError::Rejected("unknown credential".to_owned()))
        }
    }
}
