//! Stateless bearer tokens for out-of-band callers.
//!
//! A token is `pc1.local.<payload>.<footer>` where `payload` is the
//! base64url encoding of a 24-byte nonce followed by the XChaCha20-Poly1305
//! ciphertext of the JSON claims. The header and footer are bound to the
//! ciphertext as associated data, so neither can be swapped.
//!
//! # Key derivation
//!
//! The 256-bit key is derived once, at construction, with Argon2id
//! (4 iterations, 4 MiB, 2 lanes) over the configured secret and salt.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TokenConfig;

const HEADER: &str = "pc1.local.";
const FOOTER: &str = "portcullis";
const NONCE_LEN: usize = 24;

/// Argon2id memory cost in KiB (4 MiB)
const ARGON2_MEMORY_KB: u32 = 4 * 1024;
/// Argon2id iteration count
const ARGON2_ITERATIONS: u32 = 4;
/// Argon2id parallelism
const ARGON2_PARALLELISM: u32 = 2;

/// Errors from issuing or validating tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("requested ttl {requested}s exceeds the maximum of {max}s")]
    TtlTooLong { requested: i64, max: i64 },

    #[error("ttl must be positive")]
    InvalidTtl,

    /// Malformed, tampered with, or encrypted under another key.
    #[error("invalid token")]
    Invalid,

    #[error("token has expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encryption,
}

impl TokenError {
    /// Errors caused by the presented token, as opposed to local failures.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Invalid | Self::Expired | Self::NotYetValid)
    }
}

/// Claims carried inside a token. Times are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl Claims {
    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Issues and validates encrypted bearer tokens.
pub struct TokenCodec {
    cipher: XChaCha20Poly1305,
    max_ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("cipher", &"[REDACTED]")
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}

impl TokenCodec {
    /// Derive the key and build a codec.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::KeyDerivation` if Argon2 rejects its inputs.
    pub fn new(
        secret: &SecretString,
        salt: &SecretString,
        max_ttl: Duration,
    ) -> Result<Self, TokenError> {
        let key = derive_key(
            secret.expose_secret().as_bytes(),
            salt.expose_secret().as_bytes(),
        )?;
        Ok(Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key)),
            max_ttl,
        })
    }

    /// Build a codec from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::KeyDerivation` if Argon2 rejects its inputs.
    pub fn from_config(config: &TokenConfig) -> Result<Self, TokenError> {
        Self::new(&config.secret, &config.salt, config.max_age)
    }

    /// Longest ttl accepted by [`issue`](Self::issue).
    #[must_use]
    pub const fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Issue a token for `subject` valid for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::TtlTooLong` before doing any cryptographic work
    /// when `ttl` exceeds the configured maximum.
    pub fn issue(&self, subject: &str, issuer: &str, ttl: Duration) -> Result<String, TokenError> {
        self.issue_at(subject, issuer, ttl, Utc::now())
    }

    /// Like [`issue`](Self::issue) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`issue`](Self::issue).
    pub fn issue_at(
        &self,
        subject: &str,
        issuer: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        if ttl > self.max_ttl {
            return Err(TokenError::TtlTooLong {
                requested: ttl.num_seconds(),
                max: self.max_ttl.num_seconds(),
            });
        }
        if ttl <= Duration::zero() {
            return Err(TokenError::InvalidTtl);
        }

        let claims = Claims {
            sub: subject.to_owned(),
            iss: issuer.to_owned(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        let plaintext = serde_json::to_vec(&claims).map_err(|_| TokenError::Encryption)?;

        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &plaintext,
                    aad: associated_data().as_bytes(),
                },
            )
            .map_err(|_| TokenError::Encryption)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(format!(
            "{HEADER}{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(FOOTER)
        ))
    }

    /// Decrypt a token and check its validity window.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Invalid` if the envelope does not authenticate,
    /// `TokenError::Expired` or `TokenError::NotYetValid` if it does but the
    /// current time is outside its window.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Like [`validate`](Self::validate) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let rest = token.strip_prefix(HEADER).ok_or(TokenError::Invalid)?;
        let (payload, footer) = rest.split_once('.').ok_or(TokenError::Invalid)?;

        let footer = URL_SAFE_NO_PAD
            .decode(footer)
            .map_err(|_| TokenError::Invalid)?;
        if footer != FOOTER.as_bytes() {
            return Err(TokenError::Invalid);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Invalid)?;
        if payload.len() <= NONCE_LEN {
            return Err(TokenError::Invalid);
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: associated_data().as_bytes(),
                },
            )
            .map_err(|_| TokenError::Invalid)?;

        let claims: Claims =
            serde_json::from_slice(&plaintext).map_err(|_| TokenError::Invalid)?;

        let now = now.timestamp();
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }

        Ok(claims)
    }
}

fn associated_data() -> String {
    format!("{HEADER}{FOOTER}")
}

/// Derive a 256-bit key from `secret` and `salt` using Argon2id.
fn derive_key(secret: &[u8], salt: &[u8]) -> Result<[u8; 32], TokenError> {
    let params = Params::new(
        ARGON2_MEMORY_KB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|e| TokenError::KeyDerivation(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(secret, salt, &mut key)
        .map_err(|e| TokenError::KeyDerivation(e.to_string()))?;

    Ok(key)
}
