//! Business logic services for the gateway.
//!
//! # Services
//!
//! - `ceremony` - passkey registration and login gated by the session state machine
//! - `proxy` - hostname dispatch table for the internal reverse proxy
//! - `registry` - validated host mutations
//! - `session` - session get-or-create, sliding expiry, sweep
//! - `token` - encrypted bearer tokens

pub mod ceremony;
pub mod proxy;
pub mod registry;
pub mod session;
pub mod token;

pub use ceremony::{CeremonyEngine, CeremonyError, CeremonyProvider, LoginOutcome};
pub use proxy::{ProxyRouter, ProxyTable, Route};
pub use registry::{HostRegistry, RegistryError};
pub use session::SessionManager;
pub use token::{Claims, TokenCodec, TokenError};
