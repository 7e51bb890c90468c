//! Persistent records: sessions, users and hosts.
//!
//! These are plain data. Sessions hold a [`UserId`](crate::UserId), never a
//! [`User`], and hosts are referenced by hostname.

pub mod host;
pub mod session;
pub mod user;

pub use host::{
    AccessModel, Host, HostError, ProxyKind, is_valid_hostname, normalize_hostname,
    within_cookie_scope,
};
pub use session::{REDIRECT_TO_KEY, Session};
pub use user::User;
