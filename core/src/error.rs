//! Error types delivered to request completions and returned by connection
//! operations.
//!
//! # Design
//! Transport failures and structured Graph API errors arrive asynchronously
//! through completions. Configuration problems (missing client token, invalid
//! connection state) are returned synchronously from the call that detected
//! them. Every variant is `Clone` so a single transport failure can be handed
//! to each pending completion of a batch.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::connection::ConnectionState;
use crate::recovery::ErrorCategory;

/// Errors produced by the request engine.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// The HTTP exchange never completed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with an `error` object.
    #[error("{0}")]
    Api(Box<GraphApiError>),

    #[error("GraphRequestConnection cannot be started before the SDK is initialized.")]
    SdkNotInitialized,

    #[error("cannot {operation} a connection in state {state:?}")]
    InvalidState {
        state: ConnectionState,
        operation: &'static str,
    },

    #[error("a client token must be configured before making requests without an access token")]
    MissingClientToken,

    #[error("GraphRequestQueue must be configured before it can be flushed")]
    QueueNotConfigured,

    #[error("the connection was cancelled")]
    Cancelled,

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The batch response had no entry for this request.
    #[error("no response for batch entry {index}")]
    MissingResponse { index: usize },

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl GraphError {
    /// The structured API error, if this is one.
    pub fn api(&self) -> Option<&GraphApiError> {
        match self {
            GraphError::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn graph_code(&self) -> Option<i64> {
        self.api().and_then(|err| err.code)
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.api().and_then(|err| err.category)
    }
}

impl From<GraphApiError> for GraphError {
    fn from(err: GraphApiError) -> Self {
        GraphError::Api(Box::new(err))
    }
}

/// Failure reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Network,
    Timeout,
    Cancelled,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Network => "network",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// A structured error returned by the Graph API for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphApiError {
    pub message: Option<String>,
    pub code: Option<i64>,
    pub subcode: Option<i64>,
    pub http_status: Option<u16>,
    pub error_type: Option<String>,
    pub user_title: Option<String>,
    pub user_message: Option<String>,
    pub category: Option<ErrorCategory>,
    /// Only populated for transient errors.
    pub recovery_description: Option<String>,
    pub recovery_options: Vec<String>,
    pub recovery_action_name: Option<String>,
    /// The whole result entry (`{"code": .., "body": ..}`).
    pub raw: Value,
}

impl GraphApiError {
    pub fn is_transient(&self) -> bool {
        self.category == Some(ErrorCategory::Transient)
    }
}

impl fmt::Display for GraphApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, self.code) {
            (Some(message), _) => f.write_str(message),
            (None, Some(code)) => write!(f, "graph API error (code {code})"),
            (None, None) => f.write_str("graph API error"),
        }
    }
}
