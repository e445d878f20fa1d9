//! The collaborators every connection and queue shares.
//!
//! # Design
//! Instead of process-wide singletons, everything a connection consults
//! (settings, current token, error configuration, transport, logger, ...) is
//! handed over once in a `GraphContext`. Collaborators are read-mostly trait
//! objects, so the context is shared behind an `Arc` and never locked as a
//! whole. The only mutable state it owns is the "SDK ready" flag and the
//! default connection timeout.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::connection::GraphRequestConnection;
use crate::logging::{EventLogger, Logger, LoggingBehavior, TracingEventLogger, TracingLogger};
use crate::recovery::{ErrorConfiguration, ErrorConfigurationProvider};
use crate::request::{GraphRequest, GraphRequestBuilder};
use crate::routing::{DefaultDomainRouter, DomainRouter};
use crate::settings::{SdkSettings, SettingsProvider};
use crate::token::{
    AuthenticationTokenProvider, InMemoryAuthenticationTokenStore, InMemoryTokenStore, TokenStore,
};
use crate::transport::{TransportFactory, UnavailableTransportFactory};

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates connections. Retries and queue flushes go through it too.
pub trait ConnectionFactory: Send + Sync {
    fn create_connection(&self, context: Arc<GraphContext>) -> Arc<GraphRequestConnection>;
}

#[derive(Debug, Default)]
pub struct DefaultConnectionFactory;

impl ConnectionFactory for DefaultConnectionFactory {
    fn create_connection(&self, context: Arc<GraphContext>) -> Arc<GraphRequestConnection> {
        GraphRequestConnection::new(context)
    }
}

/// Gets a chance to add maintenance requests to a connection right before
/// it is serialized.
pub trait PiggybackManager: Send + Sync {
    fn add_piggyback_requests(&self, connection: &GraphRequestConnection);
}

pub struct GraphContext {
    settings: Arc<dyn SettingsProvider>,
    token_store: Arc<dyn TokenStore>,
    authentication_tokens: Arc<dyn AuthenticationTokenProvider>,
    error_configuration: Arc<dyn ErrorConfigurationProvider>,
    transport_factory: Arc<dyn TransportFactory>,
    connection_factory: Arc<dyn ConnectionFactory>,
    piggyback_manager: Option<Arc<dyn PiggybackManager>>,
    domain_router: Arc<dyn DomainRouter>,
    logger: Arc<dyn Logger>,
    event_logger: Arc<dyn EventLogger>,
    can_make_requests: AtomicBool,
    default_timeout: RwLock<Duration>,
}

impl GraphContext {
    pub fn builder() -> GraphContextBuilder {
        GraphContextBuilder::default()
    }

    /// A request builder pre-filled with the configured API version and the
    /// current access token.
    pub fn request(&self, path: impl Into<String>) -> GraphRequestBuilder {
        GraphRequest::builder(path)
            .default_version(self.settings.graph_api_version())
            .default_token(self.token_store.current_token_string())
    }

    pub fn settings(&self) -> &Arc<dyn SettingsProvider> {
        &self.settings
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.token_store
    }

    pub fn authentication_tokens(&self) -> &Arc<dyn AuthenticationTokenProvider> {
        &self.authentication_tokens
    }

    pub fn error_configuration(&self) -> &Arc<dyn ErrorConfigurationProvider> {
        &self.error_configuration
    }

    pub fn transport_factory(&self) -> &Arc<dyn TransportFactory> {
        &self.transport_factory
    }

    pub fn connection_factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.connection_factory
    }

    pub fn piggyback_manager(&self) -> Option<&Arc<dyn PiggybackManager>> {
        self.piggyback_manager.as_ref()
    }

    pub fn domain_router(&self) -> &Arc<dyn DomainRouter> {
        &self.domain_router
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn event_logger(&self) -> &Arc<dyn EventLogger> {
        &self.event_logger
    }

    pub fn can_make_requests(&self) -> bool {
        self.can_make_requests.load(Ordering::Acquire)
    }

    pub fn set_can_make_requests(&self) {
        self.can_make_requests.store(true, Ordering::Release);
    }

    pub fn reset_can_make_requests(&self) {
        self.can_make_requests.store(false, Ordering::Release);
    }

    pub fn default_connection_timeout(&self) -> Duration {
        *self.default_timeout.read()
    }

    /// Zero is rejected and the previous value kept.
    pub fn set_default_connection_timeout(&self, timeout: Duration) {
        if timeout.is_zero() {
            self.logger.log(
                LoggingBehavior::DeveloperErrors,
                "Default connection timeout must be greater than zero.",
            );
            return;
        }
        *self.default_timeout.write() = timeout;
    }
}

impl fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContext")
            .field("can_make_requests", &self.can_make_requests())
            .field("default_timeout", &self.default_connection_timeout())
            .field("has_piggyback_manager", &self.piggyback_manager.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds a `GraphContext`. Every collaborator has a stock default; only the
/// transport factory normally needs replacing.
pub struct GraphContextBuilder {
    settings: Option<Arc<dyn SettingsProvider>>,
    token_store: Option<Arc<dyn TokenStore>>,
    authentication_tokens: Option<Arc<dyn AuthenticationTokenProvider>>,
    error_configuration: Option<Arc<dyn ErrorConfigurationProvider>>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    connection_factory: Option<Arc<dyn ConnectionFactory>>,
    piggyback_manager: Option<Arc<dyn PiggybackManager>>,
    domain_router: Option<Arc<dyn DomainRouter>>,
    logger: Option<Arc<dyn Logger>>,
    event_logger: Option<Arc<dyn EventLogger>>,
    ready: bool,
    default_timeout: Duration,
}

impl Default for GraphContextBuilder {
    fn default() -> Self {
        Self {
            settings: None,
            token_store: None,
            authentication_tokens: None,
            error_configuration: None,
            transport_factory: None,
            connection_factory: None,
            piggyback_manager: None,
            domain_router: None,
            logger: None,
            event_logger: None,
            ready: true,
            default_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

impl GraphContextBuilder {
    pub fn settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn token_store(mut self, token_store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(token_store);
        self
    }

    pub fn authentication_tokens(mut self, provider: Arc<dyn AuthenticationTokenProvider>) -> Self {
        self.authentication_tokens = Some(provider);
        self
    }

    pub fn error_configuration(mut self, provider: Arc<dyn ErrorConfigurationProvider>) -> Self {
        self.error_configuration = Some(provider);
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    pub fn connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.connection_factory = Some(factory);
        self
    }

    pub fn piggyback_manager(mut self, manager: Arc<dyn PiggybackManager>) -> Self {
        self.piggyback_manager = Some(manager);
        self
    }

    pub fn domain_router(mut self, router: Arc<dyn DomainRouter>) -> Self {
        self.domain_router = Some(router);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn event_logger(mut self, event_logger: Arc<dyn EventLogger>) -> Self {
        self.event_logger = Some(event_logger);
        self
    }

    /// Whether connections may start immediately. Defaults to `true`.
    pub fn ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.default_timeout = timeout;
        }
        self
    }

    pub fn build(self) -> Arc<GraphContext> {
        Arc::new(GraphContext {
            settings: self.settings.unwrap_or_else(|| Arc::new(SdkSettings::default())),
            token_store: self
                .token_store
                .unwrap_or_else(|| Arc::new(InMemoryTokenStore::default())),
            authentication_tokens: self
                .authentication_tokens
                .unwrap_or_else(|| Arc::new(InMemoryAuthenticationTokenStore::default())),
            error_configuration: self
                .error_configuration
                .unwrap_or_else(|| Arc::new(ErrorConfiguration::default())),
            transport_factory: self
                .transport_factory
                .unwrap_or_else(|| Arc::new(UnavailableTransportFactory)),
            connection_factory: self
                .connection_factory
                .unwrap_or_else(|| Arc::new(DefaultConnectionFactory)),
            piggyback_manager: self.piggyback_manager,
            domain_router: self.domain_router.unwrap_or_else(|| Arc::new(DefaultDomainRouter)),
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger::default())),
            event_logger: self.event_logger.unwrap_or_else(|| Arc::new(TracingEventLogger)),
            can_make_requests: AtomicBool::new(self.ready),
            default_timeout: RwLock::new(self.default_timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::AccessToken;

    #[test]
    fn request_picks_up_version_and_current_token() {
        let settings = Arc::new(SdkSettings::default());
        settings.set_graph_api_version("v18.0");
        let store = Arc::new(InMemoryTokenStore::with_token(AccessToken::new("current", "app", "user")));
        let context = GraphContext::builder()
            .settings(settings.clone())
            .token_store(store.clone())
            .build();

        let request = context.request("me").build();
        assert_eq!(request.version(), "v18.0");
        assert_eq!(request.token(), Some("current"));

        let explicit = context.request("me").token("other").version("v1.0").build();
        assert_eq!(explicit.token(), Some("other"));
        assert_eq!(explicit.version(), "v1.0");

        let anonymous = context.request("me").without_token().build();
        assert_eq!(anonymous.token(), None);
    }

    #[test]
    fn ready_flag_toggles() {
        let context = GraphContext::builder().ready(false).build();
        assert!(!context.can_make_requests());
        context.set_can_make_requests();
        assert!(context.can_make_requests());
        context.reset_can_make_requests();
        assert!(!context.can_make_requests());
    }

    #[test]
    fn zero_default_timeout_is_rejected() {
        let context = GraphContext::builder().build();
        assert_eq!(context.default_connection_timeout(), DEFAULT_CONNECTION_TIMEOUT);
        context.set_default_connection_timeout(Duration::ZERO);
        assert_eq!(context.default_connection_timeout(), DEFAULT_CONNECTION_TIMEOUT);
        context.set_default_connection_timeout(Duration::from_secs(5));
        assert_eq!(context.default_connection_timeout(), Duration::from_secs(5));
    }
}
