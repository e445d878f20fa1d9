//! Process configuration consumed by the request engine.
//!
//! # Design
//! `SettingsProvider` is the read side the connection depends on.
//! `SdkSettings` is the stock implementation: a plain serde-deserialisable
//! `SettingsValues` behind a lock so values can change at runtime (a client
//! token configured after launch, recovery toggled off in tests).

use std::env;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::warn;

use crate::error::GraphError;

pub const DEFAULT_GRAPH_API_VERSION: &str = "v17.0";

pub trait SettingsProvider: Send + Sync {
    fn app_id(&self) -> Option<String>;
    fn client_token(&self) -> Option<String>;
    fn user_agent_suffix(&self) -> Option<String>;
    fn graph_api_version(&self) -> String;
    fn is_graph_error_recovery_enabled(&self) -> bool;
    /// Value of the `debug` parameter attached to single requests.
    fn graph_api_debug_param_value(&self) -> Option<String>;
    fn is_desktop_compatibility_mode(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettingsValues {
    pub app_id: Option<String>,
    pub client_token: Option<String>,
    pub user_agent_suffix: Option<String>,
    pub graph_api_version: String,
    pub graph_error_recovery_enabled: bool,
    pub graph_api_debug_param_value: Option<String>,
    pub desktop_compatibility_mode: bool,
}

impl Default for SettingsValues {
    fn default() -> Self {
        Self {
            app_id: None,
            client_token: None,
            user_agent_suffix: None,
            graph_api_version: DEFAULT_GRAPH_API_VERSION.to_string(),
            graph_error_recovery_enabled: true,
            graph_api_debug_param_value: None,
            desktop_compatibility_mode: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SdkSettings {
    values: RwLock<SettingsValues>,
}

impl SdkSettings {
    pub fn new(values: SettingsValues) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Parse settings from a JSON document. Missing keys take defaults.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let values: SettingsValues =
            serde_json::from_str(json).map_err(|e| GraphError::Serialization(e.to_string()))?;
        Ok(Self::new(values))
    }

    /// Build settings from `GRAPH_*` environment variables.
    pub fn from_env() -> Self {
        let mut values = SettingsValues::default();
        if let Ok(app_id) = env::var("GRAPH_APP_ID") {
            values.app_id = Some(app_id);
        }
        if let Ok(client_token) = env::var("GRAPH_CLIENT_TOKEN") {
            values.client_token = Some(client_token);
        }
        if let Ok(version) = env::var("GRAPH_API_VERSION") {
            values.graph_api_version = version;
        }
        if let Ok(suffix) = env::var("GRAPH_USER_AGENT_SUFFIX") {
            values.user_agent_suffix = Some(suffix);
        }
        if let Ok(raw) = env::var("GRAPH_ERROR_RECOVERY") {
            match raw.parse::<bool>() {
                Ok(enabled) => values.graph_error_recovery_enabled = enabled,
                Err(_) => warn!(value = %raw, "ignoring invalid GRAPH_ERROR_RECOVERY"),
            }
        }
        Self::new(values)
    }

    pub fn snapshot(&self) -> SettingsValues {
        self.values.read().clone()
    }

    pub fn set_app_id(&self, app_id: Option<String>) {
        self.values.write().app_id = app_id;
    }

    pub fn set_client_token(&self, client_token: Option<String>) {
        self.values.write().client_token = client_token;
    }

    pub fn set_user_agent_suffix(&self, suffix: Option<String>) {
        self.values.write().user_agent_suffix = suffix;
    }

    pub fn set_graph_api_version(&self, version: impl Into<String>) {
        self.values.write().graph_api_version = version.into();
    }

    pub fn set_graph_error_recovery_enabled(&self, enabled: bool) {
        self.values.write().graph_error_recovery_enabled = enabled;
    }

    pub fn set_graph_api_debug_param_value(&self, value: Option<String>) {
        self.values.write().graph_api_debug_param_value = value;
    }

    pub fn set_desktop_compatibility_mode(&self, enabled: bool) {
        self.values.write().desktop_compatibility_mode = enabled;
    }
}

impl SettingsProvider for SdkSettings {
    fn app_id(&self) -> Option<String> {
        self.values.read().app_id.clone()
    }

    fn client_token(&self) -> Option<String> {
        self.values.read().client_token.clone()
    }

    fn user_agent_suffix(&self) -> Option<String> {
        self.values.read().user_agent_suffix.clone()
    }

    fn graph_api_version(&self) -> String {
        self.values.read().graph_api_version.clone()
    }

    fn is_graph_error_recovery_enabled(&self) -> bool {
        self.values.read().graph_error_recovery_enabled
    }

    fn graph_api_debug_param_value(&self) -> Option<String> {
        self.values.read().graph_api_debug_param_value.clone()
    }

    fn is_desktop_compatibility_mode(&self) -> bool {
        self.values.read().desktop_compatibility_mode
    }
}
