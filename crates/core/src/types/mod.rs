//! Value types shared by every Portcullis component.

pub mod credential;
pub mod glob;
pub mod id;
pub mod state;
pub mod username;

pub use credential::{Credential, StoredPasskey, WebAuthnCredentialId};
pub use glob::{Glob, GlobError};
pub use id::*;
pub use state::{SessionEvent, SessionState, TransitionError};
pub use username::{Username, UsernameError};
