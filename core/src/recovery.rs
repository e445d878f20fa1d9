//! Data-driven error classification.
//!
//! # Design
//! The connection never hardcodes which Graph error codes are worth a retry.
//! It builds an `ErrorDescriptor` and asks the injected
//! `ErrorConfigurationProvider`. `ErrorConfiguration` is the stock provider:
//! a small default table that the server can replace or extend at runtime
//! through `update_with`.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::request::GraphRequest;

/// Error domain used for Graph API errors.
pub const GRAPH_ERROR_DOMAIN: &str = "graph";

const TRANSIENT_CODES: [i64; 6] = [1, 2, 4, 9, 17, 341];
const LOGIN_CODES: [i64; 2] = [102, 190];

const TRANSIENT_DESCRIPTION: &str = "The server is temporarily busy, please try again.";
const LOGIN_DESCRIPTION: &str = "Please log into this app again to reconnect your Facebook account.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Retrying the same request may succeed.
    Transient,
    /// The user can fix it, usually by logging in again.
    Recoverable,
    Other,
}

impl ErrorCategory {
    fn from_group_name(name: &str) -> Option<Self> {
        match name {
            "transient" => Some(ErrorCategory::Transient),
            "login" => Some(ErrorCategory::Recoverable),
            "other" => Some(ErrorCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfiguration {
    pub category: ErrorCategory,
    pub recovery_description: String,
    pub recovery_options: Vec<String>,
    pub recovery_action_name: String,
}

/// What the connection knows about a failed entry when asking for a
/// classification.
#[derive(Debug, Clone, Copy)]
pub struct ErrorDescriptor<'a> {
    pub domain: &'a str,
    pub code: Option<i64>,
    pub subcode: Option<i64>,
    pub request: &'a GraphRequest,
}

pub trait ErrorConfigurationProvider: Send + Sync {
    fn recovery_configuration(&self, descriptor: &ErrorDescriptor<'_>) -> Option<RecoveryConfiguration>;
}

/// Table keyed by code, then subcode. `None` as a subcode matches any.
type ConfigurationTable = BTreeMap<i64, BTreeMap<Option<i64>, RecoveryConfiguration>>;

/// Default provider backed by a code/subcode table.
#[derive(Debug)]
pub struct ErrorConfiguration {
    table: RwLock<ConfigurationTable>,
}

impl Default for ErrorConfiguration {
    fn default() -> Self {
        let mut table = ConfigurationTable::new();
        let transient = RecoveryConfiguration {
            category: ErrorCategory::Transient,
            recovery_description: TRANSIENT_DESCRIPTION.to_string(),
            recovery_options: vec!["OK".to_string()],
            recovery_action_name: "transient".to_string(),
        };
        let login = RecoveryConfiguration {
            category: ErrorCategory::Recoverable,
            recovery_description: LOGIN_DESCRIPTION.to_string(),
            recovery_options: vec!["OK".to_string(), "Cancel".to_string()],
            recovery_action_name: "login".to_string(),
        };
        for code in TRANSIENT_CODES {
            table.entry(code).or_default().insert(None, transient.clone());
        }
        for code in LOGIN_CODES {
            table.entry(code).or_default().insert(None, login.clone());
        }
        Self {
            table: RwLock::new(table),
        }
    }
}

impl ErrorConfiguration {
    /// A provider with no entries at all.
    pub fn empty() -> Self {
        Self {
            table: RwLock::new(ConfigurationTable::new()),
        }
    }

    /// Merge server-supplied recovery groups into the table.
    ///
    /// Each group looks like
    /// `{"name": "transient", "items": [{"code": 1, "subcodes": [463]}],
    /// "recovery_message": "...", "recovery_options": ["OK"]}`. Items without
    /// subcodes apply to every subcode of their code. Anything malformed is
    /// skipped.
    pub fn update_with(&self, groups: &[Value]) {
        let mut table = self.table.write();
        for group in groups {
            let Some(name) = group.get("name").and_then(Value::as_str) else {
                debug!(?group, "skipping recovery group without a name");
                continue;
            };
            let Some(category) = ErrorCategory::from_group_name(name) else {
                debug!(group = name, "skipping unknown recovery group");
                continue;
            };
            let Some(items) = group.get("items").and_then(Value::as_array) else {
                continue;
            };
            let configuration = RecoveryConfiguration {
                category,
                recovery_description: group
                    .get("recovery_message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                recovery_options: group
                    .get("recovery_options")
                    .and_then(Value::as_array)
                    .map(|options| {
                        options
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                recovery_action_name: name.to_string(),
            };

            for item in items {
                let Some(code) = item.get("code").and_then(Value::as_i64) else {
                    continue;
                };
                let by_subcode = table.entry(code).or_default();
                match item.get("subcodes").and_then(Value::as_array) {
                    Some(subcodes) if !subcodes.is_empty() => {
                        for subcode in subcodes.iter().filter_map(Value::as_i64) {
                            by_subcode.insert(Some(subcode), configuration.clone());
                        }
                    }
                    _ => {
                        by_subcode.insert(None, configuration.clone());
                    }
                }
            }
        }
    }
}

impl ErrorConfigurationProvider for ErrorConfiguration {
    fn recovery_configuration(&self, descriptor: &ErrorDescriptor<'_>) -> Option<RecoveryConfiguration> {
        let code = descriptor.code?;
        let table = self.table.read();
        let by_subcode = table.get(&code)?;
        descriptor
            .subcode
            .and_then(|subcode| by_subcode.get(&Some(subcode)))
            .or_else(|| by_subcode.get(&None))
            .cloned()
    }
}
