//! The immutable description of one logical Graph API call.
//!
//! # Design
//! Parameter values form a closed union (`ParamValue`), so deciding whether a
//! value travels in the query string, a JSON body field or a multipart file
//! part is an exhaustive `match` rather than a runtime type check. Parameters
//! live in a `BTreeMap` so serialized URLs and bodies are deterministic.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::connection::GraphRequestConnection;
use crate::context::GraphContext;
use crate::error::GraphError;
use crate::http::HttpMethod;
use crate::logging::{Logger, LoggingBehavior};
use crate::metadata::GraphRequestCompletion;
use crate::settings::DEFAULT_GRAPH_API_VERSION;

/// A binary payload with an explicit filename and content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAttachment {
    pub data: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

impl DataAttachment {
    pub fn new(data: impl Into<Vec<u8>>, filename: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            filename: filename.into(),
            content_type: content_type.into(),
        }
    }
}

/// A request parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Plain value sent in the query string or as a form field.
    Scalar(Value),
    /// Encoded JPEG image data.
    Image(Vec<u8>),
    /// Raw binary data.
    Data(Vec<u8>),
    File(DataAttachment),
}

impl ParamValue {
    /// The textual form used in query strings and form fields.
    ///
    /// Strings pass through, numbers and bools are rendered, arrays and
    /// objects become compact JSON. `null` and binary values have none.
    pub fn as_form_value(&self) -> Option<String> {
        match self {
            ParamValue::Scalar(value) => scalar_to_string(value),
            ParamValue::Image(_) | ParamValue::Data(_) | ParamValue::File(_) => None,
        }
    }
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Scalar(Value::String(value.to_string()))
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Scalar(Value::String(value))
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Scalar(Value::from(value))
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::Scalar(Value::from(value))
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Scalar(Value::from(value))
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Scalar(Value::Bool(value))
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        ParamValue::Scalar(value)
    }
}

impl From<DataAttachment> for ParamValue {
    fn from(value: DataAttachment) -> Self {
        ParamValue::File(value)
    }
}

/// Whether a parameter value must travel as a binary part.
pub fn is_attachment(value: &ParamValue) -> bool {
    match value {
        ParamValue::Image(_) | ParamValue::Data(_) | ParamValue::File(_) => true,
        ParamValue::Scalar(_) => false,
    }
}

/// Behaviour switches for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphRequestFlags {
    pub disable_error_recovery: bool,
    pub do_not_invalidate_token_on_error: bool,
    pub skip_client_token: bool,
}

impl GraphRequestFlags {
    pub const NONE: Self = Self {
        disable_error_recovery: false,
        do_not_invalidate_token_on_error: false,
        skip_client_token: false,
    };

    pub fn disable_error_recovery() -> Self {
        Self {
            disable_error_recovery: true,
            ..Self::NONE
        }
    }

    pub fn do_not_invalidate_token_on_error() -> Self {
        Self {
            do_not_invalidate_token_on_error: true,
            ..Self::NONE
        }
    }
}

/// One logical Graph API call. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphRequest {
    path: String,
    parameters: BTreeMap<String, ParamValue>,
    method: HttpMethod,
    version: String,
    token: Option<String>,
    current_token_fallback: bool,
    flags: GraphRequestFlags,
}

impl GraphRequest {
    /// A builder with crate defaults: GET, the default API version, no token.
    ///
    /// Without an explicit token the request is sent with whatever token is
    /// current when its connection serializes it. Use `GraphContext::request`
    /// to pick up the configured version and capture the current token now.
    pub fn builder(path: impl Into<String>) -> GraphRequestBuilder {
        GraphRequestBuilder::new(path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether a request without its own token may borrow the current one.
    /// `false` after `GraphRequestBuilder::without_token`.
    pub fn uses_current_token(&self) -> bool {
        self.current_token_fallback
    }

    pub fn flags(&self) -> GraphRequestFlags {
        self.flags
    }

    pub fn is_graph_error_recovery_disabled(&self) -> bool {
        self.flags.disable_error_recovery
    }

    pub fn has_attachments(&self) -> bool {
        self.parameters.values().any(is_attachment)
    }

    /// Send this request on its own connection.
    ///
    /// The connection comes from the context's factory, so it is subject to
    /// the same readiness check, retry policy and delegate plumbing as any
    /// other.
    pub fn start(
        self,
        context: &Arc<GraphContext>,
        completion: GraphRequestCompletion,
    ) -> Result<Arc<GraphRequestConnection>, GraphError> {
        let connection = context.connection_factory().create_connection(Arc::clone(context));
        connection.add(self, completion)?;
        connection.start()?;
        Ok(connection)
    }
}

impl fmt::Display for GraphRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graphPath: {}, HTTPMethod: {}, parameters: {{", self.path, self.method)?;
        for (index, (key, value)) in self.parameters.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            match value {
                ParamValue::Scalar(v) => write!(f, "{key:?}: {v}")?,
                ParamValue::Image(bytes) => write!(f, "{key:?}: <image {} bytes>", bytes.len())?,
                ParamValue::Data(bytes) => write!(f, "{key:?}: <data {} bytes>", bytes.len())?,
                ParamValue::File(file) => write!(f, "{key:?}: <file {}>", file.filename)?,
            }
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone)]
pub struct GraphRequestBuilder {
    path: String,
    parameters: BTreeMap<String, ParamValue>,
    method: HttpMethod,
    version: Option<String>,
    token: Option<String>,
    current_token_fallback: bool,
    flags: GraphRequestFlags,
}

impl GraphRequestBuilder {
    fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            parameters: BTreeMap::new(),
            method: HttpMethod::Get,
            version: None,
            token: None,
            current_token_fallback: true,
            flags: GraphRequestFlags::NONE,
        }
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameters<K, V>(mut self, parameters: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<ParamValue>,
    {
        self.parameters
            .extend(parameters.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Send without a user token: no token picked up from the current-token
    /// store, now or at send time.
    pub fn without_token(mut self) -> Self {
        self.token = None;
        self.current_token_fallback = false;
        self
    }

    pub fn flags(mut self, flags: GraphRequestFlags) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn default_version(mut self, version: String) -> Self {
        if self.version.is_none() {
            self.version = Some(version);
        }
        self
    }

    pub(crate) fn default_token(mut self, token: Option<String>) -> Self {
        if self.token.is_none() {
            self.token = token;
        }
        self
    }

    pub fn build(self) -> GraphRequest {
        GraphRequest {
            path: self.path,
            parameters: self.parameters,
            method: self.method,
            version: self
                .version
                .unwrap_or_else(|| DEFAULT_GRAPH_API_VERSION.to_string()),
            token: self.token,
            current_token_fallback: self.current_token_fallback,
            flags: self.flags,
        }
    }
}

/// Build the URL for a request.
///
/// A POST that is not part of a batch keeps its parameters for the body, so
/// `base` is returned unchanged. Everything else gets its scalar parameters
/// in the query string. Attachments never go into a URL.
pub fn serialize_url(
    base: &str,
    params: &BTreeMap<String, ParamValue>,
    method: HttpMethod,
    for_batch: bool,
    logger: &dyn Logger,
) -> String {
    if method == HttpMethod::Post && !for_batch {
        return base.to_string();
    }

    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        if is_attachment(value) {
            if method == HttpMethod::Get {
                logger.log(LoggingBehavior::DeveloperErrors, "can not use GET to upload a file");
            }
            continue;
        }
        if let Some(text) = value.as_form_value() {
            pairs.push(format!("{}={}", urlencoding::encode(key), urlencoding::encode(&text)));
        }
    }

    if pairs.is_empty() {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{}", pairs.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::test_support::CapturingLogger;

    fn params(pairs: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn builder_defaults() {
        let request = GraphRequest::builder("me").build();
        assert_eq!(request.path(), "me");
        assert_eq!(request.method(), HttpMethod::Get);
        assert_eq!(request.version(), DEFAULT_GRAPH_API_VERSION);
        assert!(request.token().is_none());
        assert!(request.parameters().is_empty());
        assert_eq!(request.flags(), GraphRequestFlags::NONE);
    }

    #[test]
    fn builder_collects_parameters_and_flags() {
        let request = GraphRequest::builder("activities")
            .method(HttpMethod::Post)
            .parameter("first_key", "first_value")
            .parameters([("limit", 5)])
            .token("abc")
            .flags(GraphRequestFlags::disable_error_recovery())
            .build();
        assert_eq!(request.parameters().len(), 2);
        assert_eq!(request.token(), Some("abc"));
        assert!(request.is_graph_error_recovery_disabled());
        assert!(!request.has_attachments());
    }

    #[test]
    fn attachments_are_classified() {
        assert!(is_attachment(&ParamValue::Image(vec![0xff, 0xd8])));
        assert!(is_attachment(&ParamValue::Data(Vec::new())));
        assert!(is_attachment(&ParamValue::File(DataAttachment::new(
            Vec::new(),
            "fakefile",
            "foo"
        ))));
        assert!(!is_attachment(&ParamValue::from("string")));
        assert!(!is_attachment(&ParamValue::from(42)));
    }

    #[test]
    fn get_puts_parameters_in_query() {
        let logger = CapturingLogger::default();
        let url = serialize_url(
            "https://graph.facebook.com/v17.0/me",
            &params(&[("fields", ParamValue::from("")), ("limit", ParamValue::from(10))]),
            HttpMethod::Get,
            false,
            &logger,
        );
        assert_eq!(url, "https://graph.facebook.com/v17.0/me?fields=&limit=10");
    }

    #[test]
    fn post_keeps_base_unless_batched() {
        let logger = CapturingLogger::default();
        let p = params(&[("fields", ParamValue::from(""))]);
        let base = "https://graph.facebook.com/v17.0/me";
        assert_eq!(serialize_url(base, &p, HttpMethod::Post, false, &logger), base);
        assert_eq!(
            serialize_url(base, &p, HttpMethod::Post, true, &logger),
            "https://graph.facebook.com/v17.0/me?fields="
        );
    }

    #[test]
    fn query_values_are_percent_encoded() {
        let logger = CapturingLogger::default();
        let url = serialize_url(
            "me?locale=en_US",
            &params(&[
                ("fields", ParamValue::from("id,name")),
                ("filter", ParamValue::Scalar(serde_json::json!({"a": 1}))),
                ("skip", ParamValue::Scalar(Value::Null)),
            ]),
            HttpMethod::Get,
            true,
            &logger,
        );
        assert_eq!(url, "me?locale=en_US&fields=id%2Cname&filter=%7B%22a%22%3A1%7D");
    }

    #[test]
    fn get_with_attachment_logs_and_skips() {
        let logger = CapturingLogger::default();
        let url = serialize_url(
            "me/photos",
            &params(&[("source", ParamValue::Data(vec![1, 2, 3]))]),
            HttpMethod::Get,
            false,
            &logger,
        );
        assert_eq!(url, "me/photos");
        assert_eq!(
            logger.entries(),
            vec![(LoggingBehavior::DeveloperErrors, "can not use GET to upload a file".to_string())]
        );
    }

    #[test]
    fn display_is_useful_for_debugging() {
        let request = GraphRequest::builder("me")
            .method(HttpMethod::Post)
            .parameter("fields", "")
            .build();
        assert!(request
            .to_string()
            .contains("graphPath: me, HTTPMethod: POST, parameters: {\"fields\": \"\"}"));
    }
}
