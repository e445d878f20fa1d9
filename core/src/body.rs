//! Request body encoding.
//!
//! # Design
//! A body is a bag of form fields plus binary parts. With no binary parts it
//! is sent as one JSON object. As soon as a binary part is added the whole
//! body switches to `multipart/form-data`, with each form field becoming a
//! text part.

use std::collections::BTreeMap;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{Map, Value};

use crate::error::GraphError;
use crate::logging::{Logger, LoggingBehavior};
use crate::request::{scalar_to_string, DataAttachment, ParamValue};

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq)]
struct BinaryPart {
    key: String,
    filename: String,
    content_type: String,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GraphRequestBody {
    form: Map<String, Value>,
    parts: Vec<BinaryPart>,
    boundary: String,
}

impl Default for GraphRequestBody {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphRequestBody {
    pub fn new() -> Self {
        Self {
            form: Map::new(),
            parts: Vec::new(),
            boundary: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn append_form(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.form.insert(key.into(), value.into());
    }

    pub fn append_image(&mut self, key: impl Into<String>, jpeg: Vec<u8>) {
        let key = key.into();
        self.parts.push(BinaryPart {
            filename: key.clone(),
            key,
            content_type: "image/jpeg".to_string(),
            data: jpeg,
        });
    }

    pub fn append_data(&mut self, key: impl Into<String>, data: Vec<u8>) {
        let key = key.into();
        self.parts.push(BinaryPart {
            filename: key.clone(),
            key,
            content_type: "application/octet-stream".to_string(),
            data,
        });
    }

    pub fn append_attachment(&mut self, key: impl Into<String>, attachment: DataAttachment) {
        self.parts.push(BinaryPart {
            key: key.into(),
            filename: attachment.filename,
            content_type: attachment.content_type,
            data: attachment.data,
        });
    }

    pub fn has_binary_parts(&self) -> bool {
        !self.parts.is_empty()
    }

    pub fn form(&self) -> &Map<String, Value> {
        &self.form
    }

    /// Keys of the binary parts, in insertion order.
    pub fn attachment_keys(&self) -> Vec<&str> {
        self.parts.iter().map(|part| part.key.as_str()).collect()
    }

    pub fn content_type(&self) -> String {
        if self.parts.is_empty() {
            JSON_CONTENT_TYPE.to_string()
        } else {
            format!("multipart/form-data; boundary={}", self.boundary)
        }
    }

    pub fn data(&self) -> Result<Vec<u8>, GraphError> {
        if self.parts.is_empty() {
            return serde_json::to_vec(&self.form).map_err(|e| GraphError::Serialization(e.to_string()));
        }

        let mut out = Vec::new();
        for (key, value) in &self.form {
            let text = scalar_to_string(value).unwrap_or_default();
            out.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            out.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape_quoted(key)).as_bytes(),
            );
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        for part in &self.parts {
            out.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            out.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    escape_quoted(&part.key),
                    escape_quoted(&part.filename)
                )
                .as_bytes(),
            );
            let content_type: String = part.content_type.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            out.extend_from_slice(&part.data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Ok(out)
    }

    /// `data()` gzip-compressed.
    pub fn compressed_data(&self) -> Result<Vec<u8>, GraphError> {
        let raw = self.data()?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .map_err(|e| GraphError::Serialization(format!("gzip: {e}")))?;
        encoder
            .finish()
            .map_err(|e| GraphError::Serialization(format!("gzip: {e}")))
    }
}

/// Copy `params` into `body`.
///
/// Scalars are copied only when `add_form_data` is set. Binary values are
/// always copied. `null`, objects and arrays cannot be expressed as a body
/// field and are dropped with a developer error.
pub fn append_attachments(
    params: &BTreeMap<String, ParamValue>,
    body: &mut GraphRequestBody,
    add_form_data: bool,
    logger: &dyn Logger,
) {
    for (key, value) in params {
        match value {
            ParamValue::Scalar(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                if add_form_data {
                    body.append_form(key.clone(), v.clone());
                }
            }
            ParamValue::Scalar(other) => logger.log(
                LoggingBehavior::DeveloperErrors,
                &format!("Unsupported graph request attachment: {other}, skipping."),
            ),
            ParamValue::Image(bytes) => body.append_image(key.clone(), bytes.clone()),
            ParamValue::Data(bytes) => body.append_data(key.clone(), bytes.clone()),
            ParamValue::File(attachment) => body.append_attachment(key.clone(), attachment.clone()),
        }
    }
}

/// Percent-encode the characters that would end a quoted header parameter
/// or the header line itself.
fn escape_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("%22"),
            '\r' => escaped.push_str("%0D"),
            '\n' => escaped.push_str("%0A"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::test_support::CapturingLogger;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    #[test]
    fn json_body_without_attachments() {
        let mut body = GraphRequestBody::new();
        body.append_form("first_key", "first_value");
        assert_eq!(body.content_type(), JSON_CONTENT_TYPE);
        let parsed: Value = serde_json::from_slice(&body.data().unwrap()).unwrap();
        assert_eq!(parsed, json!({"first_key": "first_value"}));
    }

    #[test]
    fn multipart_once_binary_is_added() {
        let mut body = GraphRequestBody::new();
        body.append_form("message", "hello");
        body.append_image("source", vec![0xff, 0xd8, 0xff]);
        body.append_attachment("file0", DataAttachment::new(b"abc".to_vec(), "notes.txt", "text/plain"));

        let content_type = body.content_type();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let boundary = content_type.trim_start_matches("multipart/form-data; boundary=");

        let data = body.data().unwrap();
        let text = String::from_utf8_lossy(&data);
        assert!(text.contains("name=\"message\"\r\n\r\nhello\r\n"));
        assert!(text.contains("name=\"source\"; filename=\"source\"\r\nContent-Type: image/jpeg"));
        assert!(text.contains("filename=\"notes.txt\"\r\nContent-Type: text/plain\r\n\r\nabc\r\n"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
        assert_eq!(body.attachment_keys(), vec!["source", "file0"]);
    }

    #[test]
    fn multipart_header_parameters_are_escaped() {
        let mut body = GraphRequestBody::new();
        body.append_form("say \"hi\"", "hello");
        body.append_attachment(
            "file0",
            DataAttachment::new(b"abc".to_vec(), "evil\".txt\r\nX-Injected: 1", "text/plain\r\nX-Other: 2"),
        );

        let data = body.data().unwrap();
        let text = String::from_utf8_lossy(&data);
        assert!(text.contains("name=\"say %22hi%22\"\r\n"));
        assert!(text.contains("filename=\"evil%22.txt%0D%0AX-Injected: 1\"\r\n"));
        assert!(text.contains("Content-Type: text/plainX-Other: 2\r\n\r\nabc"));
        assert!(!text.contains("\r\nX-Injected"));
        assert!(!text.contains("\r\nX-Other"));
    }

    #[test]
    fn compressed_data_round_trips_through_gzip() {
        let mut body = GraphRequestBody::new();
        body.append_form("batch", "[]");
        let compressed = body.compressed_data().unwrap();
        assert!(!compressed.is_empty());
        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, r#"{"batch":"[]"}"#);
    }

    #[test]
    fn attachments_respect_form_mode() {
        let params: BTreeMap<String, ParamValue> = [
            ("name".to_string(), ParamValue::from("value")),
            ("count".to_string(), ParamValue::from(3)),
            ("blob".to_string(), ParamValue::Data(vec![1, 2])),
        ]
        .into_iter()
        .collect();
        let logger = CapturingLogger::default();

        let mut form = GraphRequestBody::new();
        append_attachments(&params, &mut form, true, &logger);
        assert_eq!(form.form().len(), 2);
        assert_eq!(form.attachment_keys(), vec!["blob"]);

        let mut binary_only = GraphRequestBody::new();
        append_attachments(&params, &mut binary_only, false, &logger);
        assert!(binary_only.form().is_empty());
        assert_eq!(binary_only.attachment_keys(), vec!["blob"]);
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn unsupported_values_are_logged_and_dropped() {
        let params: BTreeMap<String, ParamValue> = [
            ("nothing".to_string(), ParamValue::Scalar(Value::Null)),
            ("nested".to_string(), ParamValue::Scalar(json!({"a": 1}))),
        ]
        .into_iter()
        .collect();
        let logger = CapturingLogger::default();
        let mut body = GraphRequestBody::new();
        append_attachments(&params, &mut body, true, &logger);

        assert!(body.form().is_empty());
        let messages: Vec<String> = logger.entries().into_iter().map(|(_, m)| m).collect();
        assert_eq!(
            messages,
            vec![
                "Unsupported graph request attachment: {\"a\":1}, skipping.".to_string(),
                "Unsupported graph request attachment: null, skipping.".to_string(),
            ]
        );
    }
}
