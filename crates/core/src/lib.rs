//! Portcullis Core - entity model and access rules.
//!
//! This crate provides the types shared by every Portcullis component:
//! - `gateway` - forward-auth gateway, passkey ceremonies and reverse proxy
//! - `cli` - migrations, host and user administration, bearer tokens
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions. No I/O, no
//! database access, no HTTP. The session state machine and the access
//! decision live here so they can be tested without a runtime.
//!
//! # Modules
//!
//! - [`types`] - identifiers, usernames, credentials, globs and the session state machine
//! - [`model`] - `Session`, `User` and `Host` records
//! - [`access`] - `can_access` and the allow-list toggles

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod access;
pub mod model;
pub mod types;

pub use access::{can_access, toggle_admin, toggle_host};
pub use model::*;
pub use types::*;
