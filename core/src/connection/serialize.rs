//! Turning a connection's metadata into one `HttpRequest`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::body::{append_attachments, GraphRequestBody, JSON_CONTENT_TYPE};
use crate::context::GraphContext;
use crate::error::GraphError;
use crate::http::{HttpMethod, HttpRequest};
use crate::logging::{Logger, LoggingBehavior};
use crate::metadata::BatchParameters;
use crate::request::{is_attachment, serialize_url, GraphRequest, ParamValue};
use crate::token::AuthenticationToken;

const CLIENT_TOKEN_MISSING: &str = "A client token must be configured before making Graph API requests \
without an access token. Configure one with SdkSettings::set_client_token.";

/// What the serializer needs from one pending metadata.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) request: GraphRequest,
    pub(crate) batch_parameters: BatchParameters,
}

#[derive(Debug)]
pub(crate) struct Serialized {
    pub(crate) http: HttpRequest,
    pub(crate) batched: bool,
    pub(crate) body_log: String,
    pub(crate) attachment_log: String,
    /// Every credential placed in the request, for log redaction.
    pub(crate) credentials: Vec<String>,
    /// The credential each entry was sent with, in entry order.
    pub(crate) entry_credentials: Vec<Option<String>>,
}

pub(crate) struct Serializer<'a> {
    pub(crate) context: &'a GraphContext,
    pub(crate) logger: &'a dyn Logger,
    pub(crate) overridden_version: Option<&'a str>,
    pub(crate) timeout: Duration,
}

impl Serializer<'_> {
    pub(crate) fn serialize(&self, entries: &[Entry]) -> Result<Serialized, GraphError> {
        match entries {
            [single] if !single.batch_parameters.is_named() => self.single(single),
            _ => self.batch(entries),
        }
    }

    fn single(&self, entry: &Entry) -> Result<Serialized, GraphError> {
        let request = &entry.request;
        let authentication = self.context.authentication_tokens().current_authentication_token();
        let base = self
            .context
            .domain_router()
            .base_url(Some(request), authentication.as_ref());
        let version = self.overridden_version.unwrap_or(request.version());
        let url_base = versioned_url(&base, version, request.path());

        let mut params = request.parameters().clone();
        params.insert("format".to_string(), ParamValue::from("json"));
        params.insert("include_headers".to_string(), ParamValue::from("false"));
        let credential = self.access_token_for(request, authentication.as_ref())?;
        if let Some(credential) = &credential {
            params.insert("access_token".to_string(), ParamValue::from(credential.as_str()));
        }
        if let Some(debug) = self.context.settings().graph_api_debug_param_value() {
            params.insert("debug".to_string(), ParamValue::from(debug));
        }

        let url = serialize_url(&url_base, &params, request.method(), false, self.logger);
        let mut serialized = Serialized {
            http: HttpRequest {
                method: request.method(),
                url,
                headers: Vec::new(),
                body: None,
                timeout: self.timeout,
            },
            batched: false,
            body_log: String::new(),
            attachment_log: String::new(),
            credentials: credential.iter().cloned().collect(),
            entry_credentials: vec![credential],
        };

        if request.method() == HttpMethod::Post {
            let mut body = GraphRequestBody::new();
            append_attachments(&params, &mut body, true, self.logger);
            serialized.http.headers = self.headers(&body.content_type(), true);
            serialized.http.body = Some(body.compressed_data()?);
            serialized.body_log = body_log(&body);
            serialized.attachment_log = body.attachment_keys().join(", ");
        } else {
            serialized.http.headers = self.headers(JSON_CONTENT_TYPE, false);
        }
        Ok(serialized)
    }

    fn batch(&self, entries: &[Entry]) -> Result<Serialized, GraphError> {
        let authentication = self.context.authentication_tokens().current_authentication_token();
        let base = self.context.domain_router().base_url(None, authentication.as_ref());
        let version = self
            .overridden_version
            .map(str::to_string)
            .or_else(|| entries.first().map(|entry| entry.request.version().to_string()))
            .unwrap_or_else(|| self.context.settings().graph_api_version());
        let url = if version.is_empty() {
            base
        } else {
            format!("{base}/{version}")
        };

        let credentials = entries
            .iter()
            .map(|entry| self.access_token_for(&entry.request, authentication.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let batch_token = credentials
            .iter()
            .flatten()
            .find(|credential| !is_client_token(credential))
            .or_else(|| credentials.iter().flatten().next())
            .cloned();

        let mut attachments = BTreeMap::new();
        let mut items = Vec::with_capacity(entries.len());
        for (entry, credential) in entries.iter().zip(&credentials) {
            items.push(self.batch_item(entry, credential.as_deref(), batch_token.as_deref(), &mut attachments));
        }
        let batch = serde_json::to_string(&items).map_err(|e| GraphError::Serialization(e.to_string()))?;

        let mut body = GraphRequestBody::new();
        body.append_form("batch", batch);
        body.append_form("include_headers", "false");
        body.append_form("format", "json");
        if let Some(token) = &batch_token {
            body.append_form("access_token", token.as_str());
        }
        append_attachments(&attachments, &mut body, false, self.logger);

        Ok(Serialized {
            http: HttpRequest {
                method: HttpMethod::Post,
                url,
                headers: self.headers(&body.content_type(), true),
                body: Some(body.compressed_data()?),
                timeout: self.timeout,
            },
            batched: true,
            body_log: body_log(&body),
            attachment_log: body.attachment_keys().join(", "),
            credentials: credentials.iter().flatten().cloned().collect(),
            entry_credentials: credentials,
        })
    }

    /// One element of the `batch` array. Attachments are moved into
    /// `attachments` under `file<N>`, numbered across the whole batch.
    fn batch_item(
        &self,
        entry: &Entry,
        credential: Option<&str>,
        batch_token: Option<&str>,
        attachments: &mut BTreeMap<String, ParamValue>,
    ) -> Value {
        let request = &entry.request;
        let mut params = request.parameters().clone();
        if let Some(credential) = credential {
            if Some(credential) != batch_token {
                params.insert("access_token".to_string(), ParamValue::from(credential));
            }
        }

        let mut attached_files = Vec::new();
        params.retain(|_, value| {
            if is_attachment(value) {
                let name = format!("file{}", attachments.len());
                attachments.insert(name.clone(), value.clone());
                attached_files.push(name);
                false
            } else {
                true
            }
        });

        let path = request.path().trim_start_matches('/');
        let mut item = Map::new();
        item.insert("method".to_string(), Value::from(request.method().as_str()));
        if request.method() == HttpMethod::Post {
            item.insert("relative_url".to_string(), Value::from(path));
            let form = params
                .iter()
                .filter_map(|(key, value)| {
                    value
                        .as_form_value()
                        .map(|text| format!("{}={}", urlencoding::encode(key), urlencoding::encode(&text)))
                })
                .collect::<Vec<_>>()
                .join("&");
            if !form.is_empty() {
                item.insert("body".to_string(), Value::from(form));
            }
        } else {
            let relative_url = serialize_url(path, &params, request.method(), true, self.logger);
            item.insert("relative_url".to_string(), Value::from(relative_url));
        }

        let batch = &entry.batch_parameters;
        if let Some(name) = &batch.name {
            item.insert("name".to_string(), Value::from(name.as_str()));
        }
        if let Some(depends_on) = &batch.depends_on {
            if batch.name.is_some() {
                item.insert("depends_on".to_string(), Value::from(depends_on.as_str()));
            } else {
                self.logger.log(
                    LoggingBehavior::DeveloperErrors,
                    &format!("Batch entry for {path} sets depends_on without a name; ignoring depends_on."),
                );
            }
        }
        if !attached_files.is_empty() {
            item.insert("attached_files".to_string(), Value::from(attached_files.join(",")));
        }
        for (key, value) in &batch.extra {
            item.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(item)
    }

    /// The credential a request is sent with.
    ///
    /// The request's own token wins, then the current token from the store.
    /// Without either, the app's client token credential is used, unless the
    /// request opted out of it.
    pub(crate) fn access_token_for(
        &self,
        request: &GraphRequest,
        authentication: Option<&AuthenticationToken>,
    ) -> Result<Option<String>, GraphError> {
        if let Some(token) = request.token() {
            return Ok(Some(token.to_string()));
        }
        if request.uses_current_token() {
            if let Some(token) = self.context.token_store().current_token_string() {
                return Ok(Some(token));
            }
        }
        if request.flags().skip_client_token {
            return Ok(None);
        }
        let settings = self.context.settings();
        match (settings.app_id(), settings.client_token()) {
            (Some(app_id), Some(client_token)) => {
                let credential = if authentication.is_some_and(AuthenticationToken::is_gaming) {
                    format!("GG|{app_id}|{client_token}")
                } else {
                    format!("{app_id}|{client_token}")
                };
                Ok(Some(credential))
            }
            _ => {
                self.logger.log(LoggingBehavior::DeveloperErrors, CLIENT_TOKEN_MISSING);
                Err(GraphError::MissingClientToken)
            }
        }
    }

    fn headers(&self, content_type: &str, compressed: bool) -> Vec<(String, String)> {
        let mut headers = vec![
            ("User-Agent".to_string(), self.user_agent()),
            ("Content-Type".to_string(), content_type.to_string()),
        ];
        if compressed {
            headers.push(("Content-Encoding".to_string(), "gzip".to_string()));
        }
        headers
    }

    fn user_agent(&self) -> String {
        let settings = self.context.settings();
        let mut agent = format!("GraphRustSDK.{}", env!("CARGO_PKG_VERSION"));
        if let Some(suffix) = settings.user_agent_suffix().filter(|s| !s.is_empty()) {
            agent.push('/');
            agent.push_str(&suffix);
        }
        if settings.is_desktop_compatibility_mode() {
            agent.push_str("/macOS");
        }
        agent
    }
}

fn is_client_token(credential: &str) -> bool {
    credential.contains('|')
}

fn body_log(body: &GraphRequestBody) -> String {
    serde_json::to_string(body.form()).unwrap_or_default()
}

/// `{base}/{version}/{path}`, unless `path` already carries a version.
pub(crate) fn versioned_url(base: &str, version: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if version.is_empty() || starts_with_version(path) {
        format!("{base}/{path}")
    } else {
        format!("{base}/{version}/{path}")
    }
}

fn starts_with_version(path: &str) -> bool {
    let segment = path.split('/').next().unwrap_or_default();
    let Some(number) = segment.strip_prefix('v') else {
        return false;
    };
    let mut parts = number.splitn(2, '.');
    let major = parts.next().unwrap_or_default();
    let minor = parts.next();
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(major) && minor.map_or(true, all_digits)
}
