//! A single batched HTTP exchange and its lifecycle.
//!
//! # Design
//! A connection collects `RequestMetadata` while `Created`, serializes them
//! into one `HttpRequest` (a plain call when there is exactly one unnamed
//! request, a batch envelope otherwise), hands that to its own transport and
//! demultiplexes the response back to each completion in order.
//!
//! All mutable state sits behind one mutex. The lock is never held while
//! calling the transport, a completion, the piggyback manager or the
//! delegate, so any of them may call back into the connection.
//!
//! Transient errors are retried at most once: the first attempt withholds the
//! affected metadata and starts a fresh connection marked `Attempt::Retry`,
//! which never retries again.

mod response;
mod serialize;

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::context::GraphContext;
use crate::error::{GraphError, TransportError};
use crate::http::{HttpRequest, HttpResponse};
use crate::logging::{redact_tokens, Logger, LoggingBehavior};
use crate::metadata::{BatchParameters, GraphRequestCompletion, RequestMetadata};
use crate::request::GraphRequest;
use crate::transport::{BodyProgress, DelegateQueue, Transport};

pub use response::NON_JSON_RESULT_KEY;

use self::response::{error_from_result, log_debug_messages, parse_results};
use self::serialize::{Entry, Serialized, Serializer};

/// Graph error codes that mean the access token is no longer valid.
const INVALID_TOKEN_CODES: [i64; 2] = [102, 190];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Serialized,
    Started,
    Completed,
    Cancelled,
}

/// Which try this connection is. A `Retry` connection never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attempt {
    #[default]
    First,
    Retry,
}

/// Lifecycle callbacks for a whole connection.
///
/// When a delegate queue is set every callback runs on it.
pub trait GraphRequestConnectionDelegate: Send + Sync {
    fn will_begin_loading(&self, _connection: &GraphRequestConnection) {}

    /// Called after every completion has been invoked (or handed to a retry).
    fn did_finish_loading(&self, _connection: &GraphRequestConnection) {}

    /// Called once when the exchange itself failed.
    fn did_fail_with_error(&self, _connection: &GraphRequestConnection, _error: &GraphError) {}

    fn did_send_body_data(
        &self,
        _connection: &GraphRequestConnection,
        _bytes_sent: u64,
        _total_bytes_sent: u64,
        _total_bytes_expected: u64,
    ) {
    }
}

struct Inner {
    state: ConnectionState,
    /// Set by the `start` call that owns the exchange.
    starting: bool,
    requests: Vec<RequestMetadata>,
    /// The credential each request was serialized with.
    credentials: Vec<Option<String>>,
    attempt: Attempt,
    batched: bool,
    delegate: Option<Arc<dyn GraphRequestConnectionDelegate>>,
    delegate_queue: Option<Arc<dyn DelegateQueue>>,
    logger: Option<Arc<dyn Logger>>,
    timeout: Option<Duration>,
    overridden_version: Option<String>,
    url_response: Option<HttpResponse>,
}

pub struct GraphRequestConnection {
    context: Arc<GraphContext>,
    transport: Arc<dyn Transport>,
    this: Weak<GraphRequestConnection>,
    inner: Mutex<Inner>,
}

impl GraphRequestConnection {
    pub fn new(context: Arc<GraphContext>) -> Arc<Self> {
        let transport = context.transport_factory().create_transport();
        Arc::new_cyclic(|this| Self {
            context,
            transport,
            this: this.clone(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Created,
                starting: false,
                requests: Vec::new(),
                credentials: Vec::new(),
                attempt: Attempt::First,
                batched: false,
                delegate: None,
                delegate_queue: None,
                logger: None,
                timeout: None,
                overridden_version: None,
                url_response: None,
            }),
        })
    }

    pub fn context(&self) -> &Arc<GraphContext> {
        &self.context
    }

    pub fn add(&self, request: GraphRequest, completion: GraphRequestCompletion) -> Result<(), GraphError> {
        self.add_metadata(RequestMetadata::new(request, completion))
    }

    /// Add a request that other batch entries can reference by `name`.
    pub fn add_named(
        &self,
        request: GraphRequest,
        name: &str,
        completion: GraphRequestCompletion,
    ) -> Result<(), GraphError> {
        self.add_with_parameters(request, BatchParameters::named(name), completion)
    }

    pub fn add_with_parameters(
        &self,
        request: GraphRequest,
        batch_parameters: BatchParameters,
        completion: GraphRequestCompletion,
    ) -> Result<(), GraphError> {
        self.add_metadata(RequestMetadata::new(request, completion).with_batch_parameters(batch_parameters))
    }

    pub fn add_metadata(&self, metadata: RequestMetadata) -> Result<(), GraphError> {
        self.try_add(metadata).map_err(|(err, _)| err)
    }

    /// Like `add_metadata`, but hands the metadata back on failure.
    pub(crate) fn try_add(&self, metadata: RequestMetadata) -> Result<(), (GraphError, RequestMetadata)> {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Created {
            let state = inner.state;
            drop(inner);
            self.logger().log(
                LoggingBehavior::DeveloperErrors,
                "Cannot add requests once a GraphRequestConnection has started.",
            );
            return Err((
                GraphError::InvalidState {
                    state,
                    operation: "add a request to",
                },
                metadata,
            ));
        }
        inner.requests.push(metadata);
        Ok(())
    }

    /// Send every added request.
    ///
    /// Completions are invoked later, from the transport's thread or the
    /// delegate queue. Configuration problems are returned here instead.
    pub fn start(&self) -> Result<(), GraphError> {
        let rejected = {
            let mut inner = self.inner.lock();
            let state = inner.state;
            if inner.starting || !matches!(state, ConnectionState::Created | ConnectionState::Serialized) {
                Some(state)
            } else {
                inner.starting = true;
                None
            }
        };
        if let Some(state) = rejected {
            self.logger().log(
                LoggingBehavior::DeveloperErrors,
                "GraphRequestConnection cannot be started again.",
            );
            return Err(GraphError::InvalidState {
                state,
                operation: "start",
            });
        }

        if !self.context.can_make_requests() {
            let pending = {
                let mut inner = self.inner.lock();
                inner.state = ConnectionState::Cancelled;
                mem::take(&mut inner.requests)
            };
            self.logger().log(
                LoggingBehavior::DeveloperErrors,
                "GraphRequestConnection cannot be started before the SDK is initialized.",
            );
            for metadata in pending {
                metadata.invoke(None, Err(GraphError::SdkNotInitialized));
            }
            return Ok(());
        }

        if let Some(piggyback) = self.context.piggyback_manager() {
            piggyback.add_piggyback_requests(self);
        }

        let empty = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Cancelled {
                return Ok(());
            }
            if inner.requests.is_empty() {
                inner.state = ConnectionState::Completed;
                Some(inner.delegate.clone())
            } else {
                None
            }
        };
        if let Some(delegate) = empty {
            debug!("starting an empty connection");
            if let Some(delegate) = delegate {
                self.on_delegate_queue(move |connection| delegate.did_finish_loading(connection));
            }
            return Ok(());
        }

        let serialized = match self.serialize() {
            Ok(serialized) => serialized,
            Err(err) => {
                self.inner.lock().starting = false;
                return Err(err);
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Cancelled {
                return Ok(());
            }
            inner.state = ConnectionState::Started;
            inner.starting = false;
        }

        self.log_request(&serialized);

        if let Some(delegate) = self.delegate() {
            self.on_delegate_queue(move |connection| delegate.will_begin_loading(connection));
        }

        let Some(this) = self.this.upgrade() else {
            return Err(GraphError::InvalidState {
                state: ConnectionState::Started,
                operation: "start",
            });
        };
        let progress_target = Weak::clone(&self.this);
        self.transport.execute(
            serialized.http,
            Arc::new(move |progress: BodyProgress| {
                if let Some(connection) = progress_target.upgrade() {
                    connection.report_progress(progress);
                }
            }),
            Box::new(move |result: Result<HttpResponse, TransportError>| this.transport_finished(result)),
        );
        Ok(())
    }

    /// Cancel the connection. Pending completions receive
    /// `GraphError::Cancelled`.
    pub fn cancel(&self) {
        let pending = {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Cancelled;
            mem::take(&mut inner.requests)
        };
        self.transport.invalidate_and_cancel();
        for metadata in pending {
            metadata.invoke(None, Err(GraphError::Cancelled));
        }
    }

    /// Serialize the added requests without sending them.
    pub fn build_http_request(&self) -> Result<HttpRequest, GraphError> {
        self.serialize().map(|serialized| serialized.http)
    }

    /// The typed error for a result entry, if it describes one.
    pub fn error_from_result(&self, result: &Value, request: &GraphRequest) -> Option<GraphError> {
        let provider = self
            .context
            .settings()
            .client_token()
            .map(|_| self.context.error_configuration().as_ref());
        error_from_result(result, request, provider).map(GraphError::from)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn attempt(&self) -> Attempt {
        self.inner.lock().attempt
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    pub fn url_response(&self) -> Option<HttpResponse> {
        self.inner.lock().url_response.clone()
    }

    pub fn timeout(&self) -> Duration {
        let timeout = self.inner.lock().timeout;
        timeout.unwrap_or_else(|| self.context.default_connection_timeout())
    }

    /// Zero is rejected and the previous value kept.
    pub fn set_timeout(&self, timeout: Duration) {
        if timeout.is_zero() {
            self.logger().log(
                LoggingBehavior::DeveloperErrors,
                "Connection timeout must be greater than zero.",
            );
            return;
        }
        self.inner.lock().timeout = Some(timeout);
    }

    pub fn overridden_version(&self) -> Option<String> {
        self.inner.lock().overridden_version.clone()
    }

    /// Use `version` for every request on this connection. Stored as given.
    pub fn override_graph_api_version(&self, version: impl Into<String>) {
        self.inner.lock().overridden_version = Some(version.into());
    }

    pub fn delegate(&self) -> Option<Arc<dyn GraphRequestConnectionDelegate>> {
        self.inner.lock().delegate.clone()
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn GraphRequestConnectionDelegate>>) {
        self.inner.lock().delegate = delegate;
    }

    pub fn delegate_queue(&self) -> Option<Arc<dyn DelegateQueue>> {
        self.inner.lock().delegate_queue.clone()
    }

    pub fn set_delegate_queue(&self, queue: Option<Arc<dyn DelegateQueue>>) {
        self.inner.lock().delegate_queue = queue;
    }

    /// The connection's logger, falling back to the context's.
    pub fn logger(&self) -> Arc<dyn Logger> {
        let logger = self.inner.lock().logger.clone();
        logger.unwrap_or_else(|| Arc::clone(self.context.logger()))
    }

    pub fn set_logger(&self, logger: Option<Arc<dyn Logger>>) {
        self.inner.lock().logger = logger;
    }

    pub(crate) fn set_attempt(&self, attempt: Attempt) {
        self.inner.lock().attempt = attempt;
    }

    /// Snapshot the pending requests and serialize them.
    ///
    /// A `Created` connection moves to `Serialized` in the same critical
    /// section as the snapshot, so every accepted add is in the snapshot. A
    /// failed serialization moves it back.
    fn serialize(&self) -> Result<Serialized, GraphError> {
        let (entries, overridden_version, timeout, sealed) = {
            let mut inner = self.inner.lock();
            let entries: Vec<Entry> = inner
                .requests
                .iter()
                .map(|metadata| Entry {
                    request: metadata.request.clone(),
                    batch_parameters: metadata.batch_parameters.clone(),
                })
                .collect();
            let sealed = inner.state == ConnectionState::Created;
            if sealed {
                inner.state = ConnectionState::Serialized;
            }
            (entries, inner.overridden_version.clone(), inner.timeout, sealed)
        };
        let logger = self.logger();
        let serializer = Serializer {
            context: &self.context,
            logger: logger.as_ref(),
            overridden_version: overridden_version.as_deref(),
            timeout: timeout.unwrap_or_else(|| self.context.default_connection_timeout()),
        };
        let result = serializer.serialize(&entries);

        let mut inner = self.inner.lock();
        match &result {
            Ok(serialized) => {
                inner.batched = serialized.batched;
                inner.credentials = serialized.entry_credentials.clone();
            }
            Err(_) if sealed && inner.state == ConnectionState::Serialized => {
                inner.state = ConnectionState::Created;
            }
            Err(_) => {}
        }
        result
    }

    fn log_request(&self, serialized: &Serialized) {
        let logger = self.logger();
        if !logger.is_active(LoggingBehavior::NetworkRequests) {
            return;
        }
        let http = &serialized.http;
        let entry = format!(
            "Request <GraphRequestConnection>:\n  URL: {}\n  Method: {}\n  UserAgent: {}\n  MIME: {}\n  Body Size: {} kB\n  Body (w/o attachments): {}\n  Attachments: {}",
            http.url,
            http.method,
            http.header("User-Agent").unwrap_or_default(),
            http.header("Content-Type").unwrap_or_default(),
            http.body_len() / 1024,
            serialized.body_log,
            serialized.attachment_log,
        );
        let mut tokens = serialized.credentials.clone();
        tokens.extend(
            serialized
                .credentials
                .iter()
                .map(|credential| urlencoding::encode(credential).into_owned()),
        );
        logger.log(LoggingBehavior::NetworkRequests, &redact_tokens(&entry, &tokens));
    }

    /// Run `job` on the delegate queue, or inline without one.
    fn on_delegate_queue(&self, job: impl FnOnce(&GraphRequestConnection) + Send + 'static) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        match self.delegate_queue() {
            Some(queue) => queue.dispatch(Box::new(move || job(&this))),
            None => job(&this),
        }
    }

    fn report_progress(&self, progress: BodyProgress) {
        if let Some(delegate) = self.delegate() {
            self.on_delegate_queue(move |connection| {
                delegate.did_send_body_data(
                    connection,
                    progress.bytes_sent,
                    progress.total_bytes_sent,
                    progress.total_bytes_expected,
                )
            });
        }
    }

    fn transport_finished(self: Arc<Self>, result: Result<HttpResponse, TransportError>) {
        match self.delegate_queue() {
            Some(queue) => queue.dispatch(Box::new(move || self.complete(result))),
            None => self.complete(result),
        }
    }

    fn complete(&self, result: Result<HttpResponse, TransportError>) {
        let (pending, credentials, attempt, batched, delegate) = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Cancelled {
                debug!("ignoring response for a cancelled connection");
                return;
            }
            inner.state = ConnectionState::Completed;
            if let Ok(response) = &result {
                inner.url_response = Some(response.clone());
            }
            (
                mem::take(&mut inner.requests),
                mem::take(&mut inner.credentials),
                inner.attempt,
                inner.batched,
                inner.delegate.clone(),
            )
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                let err = GraphError::Transport(err);
                for metadata in pending {
                    metadata.invoke(None, Err(err.clone()));
                }
                if let Some(delegate) = delegate {
                    delegate.did_fail_with_error(self, &err);
                }
                return;
            }
        };

        let logger = self.logger();
        let results = parse_results(
            &response,
            pending.len(),
            batched,
            logger.as_ref(),
            self.context.event_logger().as_ref(),
        );

        let settings = self.context.settings();
        let has_client_token = settings.client_token().is_some();
        let may_retry = attempt == Attempt::First && settings.is_graph_error_recovery_enabled();
        let mut withheld = Vec::new();

        for (index, (metadata, result)) in pending.into_iter().zip(results).enumerate() {
            let outcome = result.and_then(|result| {
                log_debug_messages(&result, logger.as_ref());
                match self.error_from_result(&result, &metadata.request) {
                    Some(err) => Err(err),
                    None => Ok(result),
                }
            });

            if has_client_token {
                if let Err(GraphError::Api(api)) = &outcome {
                    if may_retry && api.is_transient() && !metadata.request.is_graph_error_recovery_disabled() {
                        withheld.push(metadata);
                        continue;
                    }
                    if api.code.is_some_and(|code| INVALID_TOKEN_CODES.contains(&code)) {
                        let credential = credentials.get(index).cloned().flatten();
                        self.invalidate_token(&metadata.request, credential.as_deref());
                    }
                }
            }
            metadata.invoke(Some(&response), outcome);
        }

        if !withheld.is_empty() {
            self.retry(withheld);
        }

        if let Some(delegate) = delegate {
            delegate.did_finish_loading(self);
        }
    }

    /// Clear the current token if `credential`, the one the request was sent
    /// with, is still current.
    fn invalidate_token(&self, request: &GraphRequest, credential: Option<&str>) {
        if request.flags().do_not_invalidate_token_on_error {
            return;
        }
        let store = self.context.token_store();
        match (credential, store.current_token_string()) {
            (Some(sent), Some(current)) if sent == current => {
                debug!(path = request.path(), "clearing invalidated access token");
                store.clear();
            }
            _ => {}
        }
    }

    /// Re-send `withheld` on a new connection marked as the retry.
    fn retry(&self, withheld: Vec<RequestMetadata>) {
        let retry = self
            .context
            .connection_factory()
            .create_connection(Arc::clone(&self.context));
        retry.set_attempt(Attempt::Retry);
        let (delegate_queue, logger, timeout, overridden_version) = {
            let inner = self.inner.lock();
            (
                inner.delegate_queue.clone(),
                inner.logger.clone(),
                inner.timeout,
                inner.overridden_version.clone(),
            )
        };
        {
            let mut retry_inner = retry.inner.lock();
            retry_inner.delegate_queue = delegate_queue;
            retry_inner.logger = logger;
            retry_inner.timeout = timeout;
            retry_inner.overridden_version = overridden_version;
        }
        debug!(count = withheld.len(), "retrying transient failures");

        let mut rejected = Vec::new();
        for metadata in withheld {
            if let Err((err, metadata)) = retry.try_add(metadata) {
                rejected.push((err, metadata));
            }
        }
        for (err, metadata) in rejected {
            metadata.invoke(None, Err(err));
        }

        if let Err(err) = retry.start() {
            retry.abandon(&err);
        }
    }

    /// Give up on a connection that could not start: it becomes `Cancelled`
    /// and every pending completion receives `err`.
    pub(crate) fn abandon(&self, err: &GraphError) {
        let stranded = {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Cancelled;
            mem::take(&mut inner.requests)
        };
        for metadata in stranded {
            metadata.invoke(None, Err(err.clone()));
        }
    }
}

impl fmt::Debug for GraphRequestConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("GraphRequestConnection")
            .field("state", &inner.state)
            .field("attempt", &inner.attempt)
            .field("requests", &inner.requests)
            .finish_non_exhaustive()
    }
}
