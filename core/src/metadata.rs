//! A request paired with its completion and batch-entry options.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::GraphError;
use crate::http::HttpResponse;
use crate::request::GraphRequest;

/// Called once per request with the raw response (when one was received) and
/// either the parsed result entry or an error.
pub type GraphRequestCompletion = Box<dyn FnOnce(Option<&HttpResponse>, Result<Value, GraphError>) + Send>;

/// Box a closure as a `GraphRequestCompletion`.
pub fn completion<F>(f: F) -> GraphRequestCompletion
where
    F: FnOnce(Option<&HttpResponse>, Result<Value, GraphError>) + Send + 'static,
{
    Box::new(f)
}

/// Options for one entry of a batch envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchParameters {
    pub name: Option<String>,
    /// Name of an earlier entry this one waits for. Requires `name`.
    pub depends_on: Option<String>,
    /// Any other per-entry field, e.g. `omit_response_on_success`.
    pub extra: BTreeMap<String, Value>,
}

impl BatchParameters {
    /// Parameters naming the entry. An empty name means no parameters.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            return Self::default();
        }
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on = Some(name.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }
}

pub struct RequestMetadata {
    pub request: GraphRequest,
    pub completion: Option<GraphRequestCompletion>,
    pub batch_parameters: BatchParameters,
}

impl RequestMetadata {
    pub fn new(request: GraphRequest, completion: GraphRequestCompletion) -> Self {
        Self {
            request,
            completion: Some(completion),
            batch_parameters: BatchParameters::default(),
        }
    }

    /// Metadata whose result nobody is waiting for.
    pub fn fire_and_forget(request: GraphRequest) -> Self {
        Self {
            request,
            completion: None,
            batch_parameters: BatchParameters::default(),
        }
    }

    pub fn with_batch_parameters(mut self, batch_parameters: BatchParameters) -> Self {
        self.batch_parameters = batch_parameters;
        self
    }

    /// Deliver the outcome. Consumes the metadata so it can only happen once.
    pub fn invoke(self, response: Option<&HttpResponse>, result: Result<Value, GraphError>) {
        if let Some(completion) = self.completion {
            completion(response, result);
        }
    }
}

impl fmt::Debug for RequestMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMetadata")
            .field("request", &format_args!("{}", self.request))
            .field("has_completion", &self.completion.is_some())
            .field("batch_parameters", &self.batch_parameters)
            .finish()
    }
}
