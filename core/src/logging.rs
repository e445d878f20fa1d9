//! Behaviour-tagged logging.
//!
//! # Design
//! The engine logs through the injected `Logger` so hosts can route or mute
//! categories independently (request dumps are noisy, developer errors are
//! not). `TracingLogger` forwards the active categories to `tracing`.

use std::collections::HashSet;
use std::fmt;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// Placeholder written over access tokens in request logs.
pub const ACCESS_TOKEN_REMOVED: &str = "ACCESS_TOKEN_REMOVED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoggingBehavior {
    NetworkRequests,
    DeveloperErrors,
    GraphApiDebugInfo,
    GraphApiDebugWarning,
    AccessTokens,
    Informational,
}

impl fmt::Display for LoggingBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoggingBehavior::NetworkRequests => "network_requests",
            LoggingBehavior::DeveloperErrors => "developer_errors",
            LoggingBehavior::GraphApiDebugInfo => "graph_api_debug_info",
            LoggingBehavior::GraphApiDebugWarning => "graph_api_debug_warning",
            LoggingBehavior::AccessTokens => "access_tokens",
            LoggingBehavior::Informational => "informational",
        };
        f.write_str(label)
    }
}

pub trait Logger: Send + Sync {
    fn is_active(&self, behavior: LoggingBehavior) -> bool;
    fn log(&self, behavior: LoggingBehavior, entry: &str);
}

/// Forwards enabled behaviours to `tracing`.
#[derive(Debug)]
pub struct TracingLogger {
    enabled: RwLock<HashSet<LoggingBehavior>>,
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::with_behaviors([LoggingBehavior::DeveloperErrors])
    }
}

impl TracingLogger {
    pub fn with_behaviors(behaviors: impl IntoIterator<Item = LoggingBehavior>) -> Self {
        Self {
            enabled: RwLock::new(behaviors.into_iter().collect()),
        }
    }

    pub fn enable(&self, behavior: LoggingBehavior) {
        self.enabled.write().insert(behavior);
    }

    pub fn disable(&self, behavior: LoggingBehavior) {
        self.enabled.write().remove(&behavior);
    }
}

impl Logger for TracingLogger {
    fn is_active(&self, behavior: LoggingBehavior) -> bool {
        self.enabled.read().contains(&behavior)
    }

    fn log(&self, behavior: LoggingBehavior, entry: &str) {
        if !self.is_active(behavior) {
            return;
        }
        match behavior {
            LoggingBehavior::DeveloperErrors | LoggingBehavior::GraphApiDebugWarning => {
                warn!(%behavior, "{entry}")
            }
            LoggingBehavior::NetworkRequests | LoggingBehavior::AccessTokens => debug!(%behavior, "{entry}"),
            LoggingBehavior::GraphApiDebugInfo | LoggingBehavior::Informational => info!(%behavior, "{entry}"),
        }
    }
}

/// Sink for implicit diagnostic events.
pub trait EventLogger: Send + Sync {
    fn log_internal_event(&self, name: &str, is_implicitly_logged: bool);
}

#[derive(Debug, Default)]
pub struct TracingEventLogger;

impl EventLogger for TracingEventLogger {
    fn log_internal_event(&self, name: &str, is_implicitly_logged: bool) {
        info!(event = name, implicit = is_implicitly_logged, "internal event");
    }
}

/// Replace every occurrence of the given tokens with `ACCESS_TOKEN_REMOVED`.
pub(crate) fn redact_tokens(entry: &str, tokens: &[String]) -> String {
    tokens
        .iter()
        .filter(|token| !token.is_empty())
        .fold(entry.to_string(), |acc, token| acc.replace(token.as_str(), ACCESS_TOKEN_REMOVED))
}
