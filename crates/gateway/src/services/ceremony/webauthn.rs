//! [`CeremonyProvider`] backed by `webauthn-rs` passkeys.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use webauthn_rs::prelude::*;

use portcullis_core::{Credential, StoredPasskey, User, WebAuthnCredentialId};

use super::provider::{CeremonyProvider, Challenge, ProviderError};

/// Error creating `WebAuthn` configuration.
#[derive(Debug, thiserror::Error)]
pub enum WebauthnConfigError {
    #[error("invalid public url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("public url must have a host")]
    MissingHost,
    #[error("webauthn error: {0}")]
    WebAuthn(#[from] WebauthnError),
}

/// Ceremony context persisted between start and finish.
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
enum CeremonyState {
    Registration(PasskeyRegistration),
    Login(PasskeyAuthentication),
    Discoverable(DiscoverableAuthentication),
}

/// Passkey ceremonies for a single relying party.
pub struct WebauthnProvider {
    webauthn: Webauthn,
}

impl WebauthnProvider {
    /// Build a relying party whose id is the host of `public_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or `webauthn-rs` rejects the
    /// origin.
    pub fn new(public_url: &str, display_name: &str) -> Result<Self, WebauthnConfigError> {
        let url = Url::parse(public_url)?;

        let rp_id = url
            .host_str()
            .ok_or(WebauthnConfigError::MissingHost)?
            .to_owned();

        let webauthn = WebauthnBuilder::new(&rp_id, &url)?
            .rp_name(display_name)
            .allow_subdomains(false)
            .build()?;

        Ok(Self { webauthn })
    }

    fn passkeys(user: &User) -> Result<Vec<Passkey>, ProviderError> {
        user.credentials
            .iter()
            .map(|c| {
                serde_json::from_value::<Passkey>(c.passkey.as_value().clone())
                    .map_err(|e| ProviderError::Internal(format!("stored passkey unreadable: {e}")))
            })
            .collect()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ProviderError> {
    serde_json::to_value(value).map_err(|e| ProviderError::Internal(e.to_string()))
}

fn decode_state(state: &Value) -> Result<CeremonyState, ProviderError> {
    serde_json::from_value(state.clone())
        .map_err(|e| ProviderError::Internal(format!("ceremony state unreadable: {e}")))
}

impl CeremonyProvider for WebauthnProvider {
    fn begin_registration(&self, user: &User) -> Result<Challenge, ProviderError> {
        let exclude: Vec<CredentialID> = user
            .credentials
            .iter()
            .map(|c| CredentialID::from(c.id.as_bytes().to_vec()))
            .collect();

        let (options, registration) = self
            .webauthn
            .start_passkey_registration(
                user.id.as_uuid(),
                user.name.as_str(),
                user.name.as_str(),
                Some(exclude),
            )
            .map_err(|e| ProviderError::Internal(e.to_string()))?;

        Ok(Challenge {
            options: encode(&options)?,
            state: encode(&CeremonyState::Registration(registration))?,
        })
    }

    fn finish_registration(
        &self,
        state: &Value,
        response: &Value,
    ) -> Result<Credential, ProviderError> {
        let CeremonyState::Registration(registration) = decode_state(state)? else {
            return Err(ProviderError::Internal(
                "ceremony state is not a registration".to_owned(),
            ));
        };

        let response: RegisterPublicKeyCredential = serde_json::from_value(response.clone())
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let passkey = self
            .webauthn
            .finish_passkey_registration(&response, &registration)
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;

        let cred_id: &[u8] = passkey.cred_id().as_ref();

        Ok(Credential {
            id: WebAuthnCredentialId::new(cred_id.to_vec()),
            passkey: StoredPasskey::new(encode(&passkey)?),
            created_at: Utc::now(),
        })
    }

    fn begin_login(&self, user: Option<&User>) -> Result<Challenge, ProviderError> {
        match user {
            Some(user) => {
                let passkeys = Self::passkeys(user)?;
                let (options, authentication) = self
                    .webauthn
                    .start_passkey_authentication(&passkeys)
                    .map_err(|e| ProviderError::Internal(e.to_string()))?;
                Ok(Challenge {
                    options: encode(&options)?,
                    state: encode(&CeremonyState::Login(authentication))?,
                })
            }
            None => {
                let (options, authentication) = self
                    .webauthn
                    .start_discoverable_authentication()
                    .map_err(|e| ProviderError::Internal(e.to_string()))?;
                Ok(Challenge {
                    options: encode(&options)?,
                    state: encode(&CeremonyState::Discoverable(authentication))?,
                })
            }
        }
    }

    fn finish_login(
        &self,
        state: &Value,
        response: &Value,
        user: &User,
    ) -> Result<(), ProviderError> {
        let response: PublicKeyCredential = serde_json::from_value(response.clone())
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        match decode_state(state)? {
            CeremonyState::Login(authentication) => {
                self.webauthn
                    .finish_passkey_authentication(&response, &authentication)
                    .map_err(|e| ProviderError::Rejected(e.to_string()))?;
            }
            CeremonyState::Discoverable(authentication) => {
                let keys: Vec<DiscoverableKey> = Self::passkeys(user)?
                    .iter()
                    .map(DiscoverableKey::from)
                    .collect();
                self.webauthn
                    .finish_discoverable_authentication(&response, authentication, &keys)
                    .map_err(|e| ProviderError::Rejected(e.to_string()))?;
            }
            CeremonyState::Registration(_) => {
                return Err(ProviderError::Internal(
                    "ceremony state is not a login".to_owned(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use portcullis_core::Username;

    use super::*;

    fn provider() -> WebauthnProvider {
        WebauthnProvider::new("https://auth.example.com", "Portcullis").unwrap()
    }

    #[test]
    fn test_rejects_url_without_host() {
        assert!(WebauthnProvider::new("data:text/plain,hi", "Portcullis").is_err());
    }

    #[test]
    fn test_registration_challenge_names_user() {
        let user = User::new_pending(Username::parse("alice@example.com").unwrap(), Utc::now());
        let challenge = provider().begin_registration(&user).unwrap();

        assert_eq!(
            challenge.options["publicKey"]["user"]["name"],
            "alice@example.com"
        );
        assert_eq!(challenge.state["kind"], "registration");
    }

    #[test]
    fn test_discoverable_login_challenge() {
        let challenge = provider().begin_login(None).unwrap();
        assert_eq!(challenge.state["kind"], "discoverable");
        assert!(challenge.options["publicKey"]["challenge"].is_string());
    }

    #[test]
    fn test_garbage_registration_response_is_malformed() {
        let user = User::new_pending(Username::parse("alice").unwrap(), Utc::now());
        let provider = provider();
        let challenge = provider.begin_registration(&user).unwrap();

        let err = provider
            .finish_registration(&challenge.state, &serde_json::json!({"nope": 1}))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
