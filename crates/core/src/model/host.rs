//! Proxied hosts and their validation rules.

use core::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::Glob;

/// How a host forwards traffic. Only plain HTTP reverse proxying exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    #[default]
    Http,
}

/// Which mechanism grants access to non-public hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AccessModel {
    /// Per-user allow-list curated by administrators.
    #[default]
    AllowList,
    /// Username glob patterns carried by each host.
    Globs,
}

impl fmt::Display for AccessModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowList => write!(f, "allow-list"),
            Self::Globs => write!(f, "globs"),
        }
    }
}

impl std::str::FromStr for AccessModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow-list" | "allowlist" => Ok(Self::AllowList),
            "globs" => Ok(Self::Globs),
            _ => Err(format!("invalid access model: {s}")),
        }
    }
}

/// Reasons a host is refused by the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("invalid hostname {0:?}")]
    InvalidHostname(String),
    #[error("a backend address is required")]
    MissingBackend,
    #[error("invalid backend {backend:?}: {reason}")]
    InvalidBackend { backend: String, reason: String },
    #[error("host {hostname} won't be accessible because the cookie scope {scope} does not match")]
    OutsideCookieScope { hostname: String, scope: String },
    #[error("host {0} is not public and has no globs, it will not be accessible by anybody")]
    Unreachable(String),
}

/// A hostname published behind the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    /// Absolute http(s) URL of the upstream. `None` for hosts that were only
    /// discovered through forward-auth and have not been configured yet.
    pub backend: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: ProxyKind,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub globs: Vec<Glob>,
}

impl Host {
    /// A placeholder record for a hostname seen through forward-auth.
    #[must_use]
    pub fn discovered(hostname: &str) -> Self {
        Self {
            hostname: normalize_hostname(hostname),
            backend: None,
            kind: ProxyKind::Http,
            public: false,
            globs: Vec::new(),
        }
    }

    /// Parsed backend URL, if the host is routable.
    #[must_use]
    pub fn backend_url(&self) -> Option<Url> {
        self.backend.as_deref().and_then(|b| Url::parse(b).ok())
    }

    /// Check the host before it is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the hostname is malformed, the backend is
    /// missing or not an absolute http(s) URL, a private host falls outside
    /// the cookie scope, or (under [`AccessModel::Globs`]) a private host has
    /// no globs.
    pub fn validate(&self, cookie_scope: &str, model: AccessModel) -> Result<(), HostError> {
        if !is_valid_hostname(&self.hostname) {
            return Err(HostError::InvalidHostname(self.hostname.clone()));
        }

        let backend = self.backend.as_deref().ok_or(HostError::MissingBackend)?;
        let url = Url::parse(backend).map_err(|e| HostError::InvalidBackend {
            backend: backend.to_owned(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HostError::InvalidBackend {
                backend: backend.to_owned(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(HostError::InvalidBackend {
                backend: backend.to_owned(),
                reason: "missing host".to_owned(),
            });
        }

        if self.public {
            return Ok(());
        }

        if !within_cookie_scope(&self.hostname, cookie_scope) {
            return Err(HostError::OutsideCookieScope {
                hostname: self.hostname.clone(),
                scope: cookie_scope.to_owned(),
            });
        }

        if model == AccessModel::Globs && self.globs.is_empty() {
            return Err(HostError::Unreachable(self.hostname.clone()));
        }

        Ok(())
    }
}

/// Lowercase, drop any `:port` suffix and a trailing root dot.
#[must_use]
pub fn normalize_hostname(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_port = match trimmed.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            host
        }
        _ => trimmed,
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

/// Whether `hostname` can read a cookie scoped to `scope`.
#[must_use]
pub fn within_cookie_scope(hostname: &str, scope: &str) -> bool {
    let scope = scope.trim_start_matches('.');
    if scope.is_empty() {
        return false;
    }
    hostname == scope
        || hostname
            .strip_suffix(scope)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Whether `hostname` is a lowercase DNS name: dot-separated labels of
/// letters, digits and inner hyphens.
#[must_use]
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn host(hostname: &str, backend: &str, public: bool) -> Host {
        Host {
            hostname: hostname.to_string(),
            backend: Some(backend.to_string()),
            kind: ProxyKind::Http,
            public,
            globs: Vec::new(),
        }
    }

    #[test]
    fn test_valid_private_host_under_allow_list() {
        let h = host("app.example.com", "http://10.0.0.5:8080", false);
        assert!(h.validate("example.com", AccessModel::AllowList).is_ok());
    }

    #[test]
    fn test_private_host_without_globs_rejected_under_glob_model() {
        let h = host("app.example.com", "http://10.0.0.5:8080", false);
        assert_eq!(
            h.validate("example.com", AccessModel::Globs),
            Err(HostError::Unreachable("app.example.com".to_string()))
        );

        let mut with_glob = h;
        with_glob.globs.push(Glob::new("*@example.com").unwrap());
        assert!(with_glob.validate("example.com", AccessModel::Globs).is_ok());
    }

    #[test]
    fn test_backend_must_be_http() {
        let h = host("app.example.com", "ftp://files", false);
        assert!(matches!(
            h.validate("example.com", AccessModel::AllowList),
            Err(HostError::InvalidBackend { .. })
        ));

        let h = host("app.example.com", "not a url", false);
        assert!(matches!(
            h.validate("example.com", AccessModel::AllowList),
            Err(HostError::InvalidBackend { .. })
        ));
    }

    #[test]
    fn test_missing_backend() {
        let h = Host::discovered("app.example.com");
        assert_eq!(
            h.validate("example.com", AccessModel::AllowList),
            Err(HostError::MissingBackend)
        );
    }

    #[test]
    fn test_private_host_outside_scope() {
        let h = host("app.other.org", "https://backend", false);
        assert!(matches!(
            h.validate("example.com", AccessModel::AllowList),
            Err(HostError::OutsideCookieScope { .. })
        ));
    }

    #[test]
    fn test_public_host_may_live_outside_scope() {
        let h = host("www.other.org", "https://backend", true);
        assert!(h.validate("example.com", AccessModel::Globs).is_ok());
    }

    #[test]
    fn test_invalid_hostname() {
        let h = host("bad host", "https://backend", true);
        assert!(matches!(
            h.validate("example.com", AccessModel::AllowList),
            Err(HostError::InvalidHostname(_))
        ));
    }

    #[test]
    fn test_hostname_shape() {
        assert!(is_valid_hostname("app.example.com"));
        assert!(is_valid_hostname("localhost"));
        assert!(!is_valid_hostname("not a host!!"));
        assert!(!is_valid_hostname("-bad.example.com"));
        assert!(!is_valid_hostname("a..b"));
        assert!(!is_valid_hostname(""));
    }

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(normalize_hostname("App.Example.com:8443"), "app.example.com");
        assert_eq!(normalize_hostname("app.example.com."), "app.example.com");
        assert_eq!(normalize_hostname(" app.example.com "), "app.example.com");
    }

    #[test]
    fn test_within_cookie_scope() {
        assert!(within_cookie_scope("app.example.com", "example.com"));
        assert!(within_cookie_scope("app.example.com", ".example.com"));
        assert!(within_cookie_scope("example.com", "example.com"));
        assert!(!within_cookie_scope("badexample.com", "example.com"));
        assert!(!within_cookie_scope("app.example.com", ""));
    }

    #[test]
    fn test_access_model_parse() {
        assert_eq!("allow-list".parse::<AccessModel>().unwrap(), AccessModel::AllowList);
        assert_eq!("globs".parse::<AccessModel>().unwrap(), AccessModel::Globs);
        assert!("acl".parse::<AccessModel>().is_err());
    }

    #[test]
    fn test_host_json_uses_type_key() {
        let h = host("app.example.com", "http://b", false);
        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["type"], "http");
    }
}
