//! Collects fire-and-forget requests until someone flushes them.
//!
//! # Design
//! `flush` swaps the pending list out under the mutex and only then builds
//! the connection, so requests enqueued during a flush land in the next
//! batch instead of being lost or sent twice. Once a request has left the
//! pending list its completion is always invoked, even when the connection
//! refuses it.

use std::mem;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::connection::GraphRequestConnection;
use crate::context::GraphContext;
use crate::error::GraphError;
use crate::logging::LoggingBehavior;
use crate::metadata::{GraphRequestCompletion, RequestMetadata};
use crate::request::GraphRequest;

#[derive(Debug, Default)]
pub struct GraphRequestQueue {
    context: Mutex<Option<Arc<GraphContext>>>,
    pending: Mutex<Vec<RequestMetadata>>,
}

impl GraphRequestQueue {
    pub fn new(context: Arc<GraphContext>) -> Self {
        Self {
            context: Mutex::new(Some(context)),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide queue. Unusable until `configure` is called.
    pub fn shared() -> &'static GraphRequestQueue {
        static SHARED: OnceLock<GraphRequestQueue> = OnceLock::new();
        SHARED.get_or_init(GraphRequestQueue::default)
    }

    pub fn configure(&self, context: Arc<GraphContext>) {
        *self.context.lock() = Some(context);
    }

    /// Drop the context and every pending request without invoking them.
    pub fn reset(&self) {
        *self.context.lock() = None;
        self.pending.lock().clear();
    }

    pub fn enqueue(&self, request: GraphRequest, completion: GraphRequestCompletion) {
        self.enqueue_metadata(RequestMetadata::new(request, completion));
    }

    pub fn enqueue_metadata(&self, metadata: RequestMetadata) {
        self.pending.lock().push(metadata);
    }

    pub fn enqueue_requests(&self, requests: Vec<RequestMetadata>) {
        self.pending.lock().extend(requests);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Send everything enqueued so far on one new connection.
    ///
    /// Returns `Ok(None)` when there was nothing to send.
    pub fn flush(&self) -> Result<Option<Arc<GraphRequestConnection>>, GraphError> {
        let Some(context) = self.context.lock().clone() else {
            tracing::warn!(
                behavior = %LoggingBehavior::DeveloperErrors,
                "GraphRequestQueue must be configured before it can be flushed."
            );
            return Err(GraphError::QueueNotConfigured);
        };

        let batch = mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(None);
        }
        debug!(count = batch.len(), "flushing graph request queue");

        let connection = context
            .connection_factory()
            .create_connection(Arc::clone(&context));
        let mut batch = batch.into_iter();
        while let Some(metadata) = batch.next() {
            if let Err((err, metadata)) = connection.try_add(metadata) {
                metadata.invoke(None, Err(err.clone()));
                for metadata in batch {
                    metadata.invoke(None, Err(err.clone()));
                }
                return Err(err);
            }
        }
        if let Err(err) = connection.start() {
            connection.abandon(&err);
            return Err(err);
        }
        Ok(Some(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConnectionFactory;
    use crate::metadata::completion;

    #[test]
    fn enqueue_variants_accumulate() {
        let queue = GraphRequestQueue::new(GraphContext::builder().build());
        assert!(queue.is_empty());
        queue.enqueue(GraphRequest::builder("me").build(), completion(|_, _| {}));
        queue.enqueue_metadata(RequestMetadata::fire_and_forget(GraphRequest::builder("a").build()));
        queue.enqueue_requests(vec![
            RequestMetadata::fire_and_forget(GraphRequest::builder("b").build()),
            RequestMetadata::fire_and_forget(GraphRequest::builder("c").build()),
        ]);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn unconfigured_flush_keeps_requests() {
        let queue = GraphRequestQueue::default();
        queue.enqueue_metadata(RequestMetadata::fire_and_forget(GraphRequest::builder("me").build()));
        let err = queue.flush().unwrap_err();
        assert!(matches!(err, GraphError::QueueNotConfigured));
        assert_eq!(err.to_string(), "GraphRequestQueue must be configured before it can be flushed");
        assert_eq!(queue.len(), 1);

        queue.reset();
        assert!(queue.is_empty());
    }

    /// Hands out connections that were already started.
    struct StartedConnections;

    impl ConnectionFactory for StartedConnections {
        fn create_connection(&self, context: Arc<GraphContext>) -> Arc<GraphRequestConnection> {
            let connection = GraphRequestConnection::new(context);
            connection.start().unwrap();
            connection
        }
    }

    fn recording(outcomes: &Arc<Mutex<Vec<Result<(), GraphError>>>>) -> GraphRequestCompletion {
        let outcomes = Arc::clone(outcomes);
        completion(move |_, result| outcomes.lock().push(result.map(|_| ())))
    }

    #[test]
    fn refused_requests_still_complete() {
        let context = GraphContext::builder()
            .connection_factory(Arc::new(StartedConnections))
            .build();
        let queue = GraphRequestQueue::new(context);
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue(GraphRequest::builder("a").build(), recording(&outcomes));
        queue.enqueue(GraphRequest::builder("b").build(), recording(&outcomes));
        queue.enqueue(GraphRequest::builder("c").build(), recording(&outcomes));

        assert!(matches!(queue.flush(), Err(GraphError::InvalidState { .. })));
        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|outcome| matches!(outcome, Err(GraphError::InvalidState { .. }))));
        assert!(queue.is_empty());
    }

    #[test]
    fn failed_start_completes_the_batch() {
        // no client token, so serialization fails
        let queue = GraphRequestQueue::new(GraphContext::builder().build());
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue(GraphRequest::builder("a").build(), recording(&outcomes));
        queue.enqueue(GraphRequest::builder("b").build(), recording(&outcomes));

        assert!(matches!(queue.flush(), Err(GraphError::MissingClientToken)));
        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|outcome| matches!(outcome, Err(GraphError::MissingClientToken))));
    }

    #[test]
    fn empty_flush_sends_nothing() {
        let queue = GraphRequestQueue::new(GraphContext::builder().build());
        assert!(queue.flush().unwrap().is_none());
    }
}
