//! Graph API request batching, transport and error-recovery engine.
//!
//! # Overview
//! Independently issued Graph API calls are collected on a
//! `GraphRequestConnection` (directly, or through a `GraphRequestQueue`),
//! sent as one HTTP exchange, and the aggregate response is demultiplexed
//! back to each caller's completion. Failed entries are classified by an
//! injected `ErrorConfigurationProvider`. Transient failures are retried once
//! on a fresh connection.
//!
//! # Design
//! - The core never touches the network (host-does-IO pattern). Connections
//!   build `HttpRequest` values and hand them to an injected `Transport`,
//!   which reports an `HttpResponse` back exactly once.
//! - Every collaborator (settings, token store, transport, logger, ...) is
//!   supplied once through `GraphContext` rather than global singletons.
//! - Parameter values are a closed `ParamValue` union, so deciding between
//!   query string, JSON body and multipart part is an exhaustive match.

pub mod body;
pub mod connection;
pub mod context;
pub mod error;
pub mod http;
pub mod logging;
pub mod metadata;
pub mod queue;
pub mod recovery;
pub mod request;
pub mod routing;
pub mod settings;
pub mod token;
pub mod transport;

pub use connection::{Attempt, ConnectionState, GraphRequestConnection, GraphRequestConnectionDelegate};
pub use context::{ConnectionFactory, DefaultConnectionFactory, GraphContext, GraphContextBuilder, PiggybackManager};
pub use error::{GraphApiError, GraphError, TransportError, TransportErrorKind};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use logging::{EventLogger, Logger, LoggingBehavior, TracingEventLogger, TracingLogger};
pub use metadata::{completion, BatchParameters, GraphRequestCompletion, RequestMetadata};
pub use queue::GraphRequestQueue;
pub use recovery::{
    ErrorCategory, ErrorConfiguration, ErrorConfigurationProvider, ErrorDescriptor, RecoveryConfiguration,
};
pub use request::{DataAttachment, GraphRequest, GraphRequestBuilder, GraphRequestFlags, ParamValue};
pub use routing::{DefaultDomainRouter, DomainRouter, FixedDomainRouter};
pub use settings::{SdkSettings, SettingsProvider, SettingsValues};
pub use token::{
    AccessToken, AuthenticationToken, AuthenticationTokenProvider, InMemoryAuthenticationTokenStore, InMemoryTokenStore,
    TokenStore,
};
pub use transport::{
    BodyProgress, DelegateQueue, ProgressHandler, SerialQueue, Transport, TransportCompletion, TransportFactory,
};
