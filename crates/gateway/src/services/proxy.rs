//! Hostname dispatch table for the internal reverse proxy.
//!
//! The table is an immutable snapshot behind a single `Arc`. A rebuild
//! constructs a complete replacement and swaps the reference, so readers see
//! either the old table or the new one, never a partial update.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::task::JoinHandle;
use url::Url;

use portcullis_core::{Host, normalize_hostname};

use crate::store::{DynStore, StoreError};

/// A routable host and its parsed upstream.
#[derive(Debug, Clone)]
pub struct Route {
    pub host: Host,
    pub backend: Url,
}

/// Immutable hostname to route map.
#[derive(Debug, Clone, Default)]
pub struct ProxyTable {
    routes: HashMap<String, Route>,
}

impl ProxyTable {
    /// Build a table from host records. Hosts without a usable backend are
    /// left out.
    #[must_use]
    pub fn build(hosts: Vec<Host>) -> Self {
        let routes = hosts
            .into_iter()
            .filter_map(|host| {
                let backend = host.backend_url()?;
                Some((host.hostname.clone(), Route { host, backend }))
            })
            .collect();
        Self { routes }
    }

    #[must_use]
    pub fn get(&self, hostname: &str) -> Option<&Route> {
        self.routes.get(&normalize_hostname(hostname))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Holder of the current [`ProxyTable`] snapshot.
#[derive(Debug, Default)]
pub struct ProxyRouter {
    table: RwLock<Arc<ProxyTable>>,
}

impl ProxyRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The table in effect right now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ProxyTable> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, table: ProxyTable) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }

    /// Reload every host from the store and swap in a fresh table.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the host list cannot be read; the previous
    /// table stays in effect.
    pub async fn rebuild(&self, store: &DynStore) -> Result<usize, StoreError> {
        let hosts = store.list_hosts().await?;
        let table = ProxyTable::build(hosts);
        let routes = table.len();
        self.swap(table);
        tracing::info!(routes, "proxy router rebuilt");
        Ok(routes)
    }

    /// Rebuild in the background. Requests keep using the old table until
    /// the swap.
    pub fn spawn_rebuild(self: &Arc<Self>, store: DynStore) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = router.rebuild(&store).await {
                tracing::error!(error = %e, "proxy router rebuild failed");
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};

    fn host(name: &str, backend: Option<&str>) -> Host {
        Host {
            backend: backend.map(str::to_owned),
            ..Host::discovered(name)
        }
    }

    #[test]
    fn test_build_skips_hosts_without_backend() {
        let table = ProxyTable::build(vec![
            host("app.example.com", Some("http://10.0.0.1:8080")),
            host("seen.example.com", None),
            host("broken.example.com", Some("not a url")),
        ]);
        assert_eq!(table.len(), 1);
        assert!(table.get("app.example.com").is_some());
        assert!(table.get("seen.example.com").is_none());
    }

    #[test]
    fn test_lookup_normalizes_host_header() {
        let table = ProxyTable::build(vec![host("app.example.com", Some("http://10.0.0.1"))]);
        let route = table.get("App.Example.com:443").unwrap();
        assert_eq!(route.backend.as_str(), "http://10.0.0.1/");
    }

    #[tokio::test]
    async fn test_rebuild_swaps_snapshot() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let router = Arc::new(ProxyRouter::new());
        let before = router.snapshot();
        assert!(before.is_empty());

        store
            .save_host(&host("app.example.com", Some("http://10.0.0.1")))
            .await
            .unwrap();
        router.spawn_rebuild(store.clone()).await.unwrap();

        let after = router.snapshot();
        assert_eq!(after.len(), 1);
        // Readers holding the old snapshot keep seeing it.
        assert!(before.is_empty());
    }
}
