//! Access decisions.
//!
//! Pure functions over a [`User`] and a [`Host`]; nothing here touches a
//! store or a request.

use crate::model::{Host, User};

/// May `user` reach `host`?
///
/// - public hosts admit everyone, including anonymous callers
/// - anonymous callers are refused everywhere else
/// - administrators bypass every per-host rule
/// - otherwise the host must be on the user's allow-list, or one of the
///   host's globs must match the username
#[must_use]
pub fn can_access(user: Option<&User>, host: &Host) -> bool {
    if host.public {
        return true;
    }

    let Some(user) = user else {
        return false;
    };

    if user.admin {
        return true;
    }

    if user.accessible_hosts.iter().any(|h| *h == host.hostname) {
        return true;
    }

    host.globs.iter().any(|g| g.matches(user.name.as_str()))
}

/// Grant `hostname` if absent, revoke it if present.
///
/// Returns whether the user can reach the host through the allow-list after
/// the toggle.
pub fn toggle_host(user: &mut User, hostname: &str) -> bool {
    if let Some(pos) = user.accessible_hosts.iter().position(|h| h == hostname) {
        user.accessible_hosts.remove(pos);
        false
    } else {
        user.accessible_hosts.push(hostname.to_owned());
        true
    }
}

/// Flip the administrator flag, returning the new value.
pub const fn toggle_admin(user: &mut User) -> bool {
    user.admin = !user.admin;
    user.admin
}
