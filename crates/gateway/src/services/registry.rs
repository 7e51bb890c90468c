//! Host registry: validated host mutations that keep the proxy table fresh.

use std::sync::Arc;

use thiserror::Error;

use portcullis_core::{
    AccessModel, Host, HostError, is_valid_hostname, normalize_hostname, within_cookie_scope,
};

use super::proxy::ProxyRouter;
use crate::store::{DynStore, StoreError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Invalid(#[from] HostError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Hosts published behind the gateway.
#[derive(Clone)]
pub struct HostRegistry {
    store: DynStore,
    router: Arc<ProxyRouter>,
    cookie_scope: String,
    access_model: AccessModel,
}

impl HostRegistry {
    #[must_use]
    pub fn new(
        store: DynStore,
        router: Arc<ProxyRouter>,
        cookie_scope: impl Into<String>,
        access_model: AccessModel,
    ) -> Self {
        Self {
            store,
            router,
            cookie_scope: cookie_scope.into(),
            access_model,
        }
    }

    #[must_use]
    pub const fn access_model(&self) -> AccessModel {
        self.access_model
    }

    /// Validate and upsert a host, then rebuild the router in the background.
    ///
    /// # Errors
    ///
    /// `RegistryError::Invalid` if validation fails, `RegistryError::Store`
    /// if it cannot be saved.
    pub async fn add(&self, mut host: Host) -> Result<Host, RegistryError> {
        host.hostname = normalize_hostname(&host.hostname);
        host.validate(&self.cookie_scope, self.access_model)?;
        self.store.save_host(&host).await?;

        tracing::info!(
            hostname = %host.hostname,
            backend = host.backend.as_deref().unwrap_or_default(),
            public = host.public,
            "host added"
        );
        self.router.spawn_rebuild(self.store.clone());
        Ok(host)
    }

    /// Remove a host, then rebuild the router in the background.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` if no such host exists.
    pub async fn delete(&self, hostname: &str) -> Result<(), RegistryError> {
        let hostname = normalize_hostname(hostname);
        self.store.delete_host(&hostname).await?;

        tracing::info!(%hostname, "host deleted");
        self.router.spawn_rebuild(self.store.clone());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `StoreError` on store failure.
    pub async fn list(&self) -> Result<Vec<Host>, RegistryError> {
        Ok(self.store.list_hosts().await?)
    }

    /// Load a host by name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on store failure.
    pub async fn get(&self, hostname: &str) -> Result<Option<Host>, RegistryError> {
        Ok(self.store.get_host(&normalize_hostname(hostname)).await?)
    }

    /// Record a hostname seen through forward-auth so administrators can
    /// configure it later. Returns the stored record.
    ///
    /// Only well-formed names inside the cookie scope are recorded; for any
    /// other unknown name an unsaved placeholder is returned. Discovered
    /// hosts have no backend, so the router is not rebuilt.
    ///
    /// # Errors
    ///
    /// `RegistryError::Invalid` if `hostname` is not a DNS name,
    /// `RegistryError::Store` on store failure.
    pub async fn ensure_known(&self, hostname: &str) -> Result<Host, RegistryError> {
        let discovered = Host::discovered(hostname);
        if !is_valid_hostname(&discovered.hostname) {
            return Err(HostError::InvalidHostname(discovered.hostname).into());
        }
        if let Some(existing) = self.store.get_host(&discovered.hostname).await? {
            return Ok(existing);
        }
        if !within_cookie_scope(&discovered.hostname, &self.cookie_scope) {
            tracing::debug!(
                hostname = %discovered.hostname,
                "not recording a host outside the cookie scope"
            );
            return Ok(discovered);
        }

        if self.store.insert_host_if_absent(&discovered).await? {
            tracing::info!(hostname = %discovered.hostname, "host discovered");
            return Ok(discovered);
        }
        Ok(self
            .store
            .get_host(&discovered.hostname)
            .await?
            .unwrap_or(discovered))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use portcullis_core::Glob;

    use super::*;
    use crate::store::MemoryStore;

    fn registry(model: AccessModel) -> (HostRegistry, Arc<ProxyRouter>) {
        let store: DynStore = Arc::new(MemoryStore::new());
        let router = Arc::new(ProxyRouter::new());
        (
            HostRegistry::new(store, router.clone(), "example.com", model),
            router,
        )
    }

    fn host(name: &str) -> Host {
        Host {
            backend: Some("http://10.0.0.1:8080".to_owned()),
            ..Host::discovered(name)
        }
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let (reg, _) = registry(AccessModel::AllowList);
        reg.add(host("App.Example.com")).await.unwrap();
        let hosts = reg.list().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].hostname, "app.example.com");
    }

    #[tokio::test]
    async fn test_add_rejects_outside_scope() {
        let (reg, _) = registry(AccessModel::AllowList);
        let err = reg.add(host("app.other.org")).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Invalid(HostError::OutsideCookieScope { .. })
        ));
        assert!(reg.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_globs_model_requires_a_mechanism() {
        let (reg, _) = registry(AccessModel::Globs);
        let err = reg.add(host("app.example.com")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Invalid(HostError::Unreachable(_))));

        let with_glob = Host {
            globs: vec![Glob::new("*@example.com").unwrap()],
            ..host("app.example.com")
        };
        reg.add(with_glob).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (reg, _) = registry(AccessModel::AllowList);
        let err = reg.delete("ghost.example.com").await.unwrap_err();
        assert!(matches!(err, RegistryError::Store(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_ensure_known_keeps_configured_host() {
        let (reg, _) = registry(AccessModel::AllowList);
        let seen = reg.ensure_known("new.example.com").await.unwrap();
        assert!(seen.backend.is_none());

        reg.add(Host { public: true, ..host("app.example.com") })
            .await
            .unwrap();
        let existing = reg.ensure_known("app.example.com").await.unwrap();
        assert!(existing.public);
        assert_eq!(reg.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ensure_known_records_only_plausible_hosts() {
        let (reg, _) = registry(AccessModel::AllowList);

        let err = reg.ensure_known("not a host!!").await.unwrap_err();
        assert!(matches!(err, RegistryError::Invalid(HostError::InvalidHostname(_))));

        let outside = reg.ensure_known("evil.test").await.unwrap();
        assert!(outside.backend.is_none());
        assert!(!outside.public);

        reg.ensure_known("app.example.com:8443").await.unwrap();
        let names: Vec<String> = reg
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.hostname)
            .collect();
        assert_eq!(names, vec!["app.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_configured_public_host_outside_scope_is_returned() {
        let (reg, _) = registry(AccessModel::AllowList);
        reg.add(Host { public: true, ..host("www.other.org") })
            .await
            .unwrap();
        let known = reg.ensure_known("www.other.org").await.unwrap();
        assert!(known.public);
    }

    #[tokio::test]
    async fn test_mutations_rebuild_router() {
        let (reg, router) = registry(AccessModel::AllowList);
        reg.add(host("app.example.com")).await.unwrap();

        // The rebuild is detached; give it a chance to run.
        for _ in 0..50 {
            if !router.snapshot().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(router.snapshot().get("app.example.com").is_some());
    }
}
