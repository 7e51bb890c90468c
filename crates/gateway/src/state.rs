//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::services::{
    CeremonyEngine, CeremonyProvider, HostRegistry, ProxyRouter, SessionManager, TokenCodec,
    TokenError,
};
use crate::store::DynStore;

/// Connect timeout for backend requests in internal proxy mode.
const BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Error assembling application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("token key derivation failed: {0}")]
    Token(#[from] TokenError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable; every field sits behind one `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: GatewayConfig,
    store: DynStore,
    sessions: SessionManager,
    ceremonies: CeremonyEngine,
    registry: HostRegistry,
    router: Arc<ProxyRouter>,
    tokens: TokenCodec,
    http: reqwest::Client,
}

impl AppState {
    /// Wire the services together.
    ///
    /// The proxy table starts empty; call
    /// [`ProxyRouter::rebuild`] before serving traffic.
    ///
    /// # Errors
    ///
    /// Returns an error if the token key cannot be derived or the HTTP
    /// client cannot be built.
    pub fn new(
        config: GatewayConfig,
        store: DynStore,
        provider: Arc<dyn CeremonyProvider>,
    ) -> Result<Self, StateError> {
        let tokens = TokenCodec::from_config(&config.tokens)?;
        let router = Arc::new(ProxyRouter::new());
        let sessions = SessionManager::new(store.clone(), config.session_lifetime);
        let ceremonies = CeremonyEngine::new(store.clone(), provider);
        let registry = HostRegistry::new(
            store.clone(),
            router.clone(),
            config.cookie_scope.clone(),
            config.access_model,
        );
        let http = reqwest::Client::builder()
            .connect_timeout(BACKEND_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                sessions,
                ceremonies,
                registry,
                router,
                tokens,
                http,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &DynStore {
        &self.inner.store
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    #[must_use]
    pub fn ceremonies(&self) -> &CeremonyEngine {
        &self.inner.ceremonies
    }

    #[must_use]
    pub fn registry(&self) -> &HostRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn router(&self) -> &Arc<ProxyRouter> {
        &self.inner.router
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenCodec {
        &self.inner.tokens
    }

    /// Client used to reach backends.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }
}
