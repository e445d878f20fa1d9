//! A fake Graph API for end-to-end tests.
//!
//! # Design
//! Every endpoint is a plain function from (method, path, query) to a
//! status and JSON body, so the batch endpoint can answer each entry by
//! calling the same functions it serves over HTTP. Request bodies may be
//! gzip-encoded, as the client sends them.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct AppState {
    flaky_calls: AtomicUsize,
}

type SharedState = Arc<AppState>;

/// One entry of the `batch` form field.
#[derive(Debug, Deserialize)]
pub struct BatchEntry {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub relative_url: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

type Reply = (StatusCode, Json<Value>);

pub fn app() -> Router {
    let state: SharedState = Arc::new(AppState::default());
    Router::new()
        .route("/{version}", post(batch))
        .route("/{version}/me", get(me))
        .route("/{version}/busy", get(busy))
        .route("/{version}/flaky", get(flaky))
        .route("/{version}/{*path}", post(echo))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn reply((status, body): (u16, Value)) -> Reply {
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
}

fn graph_error(code: i64, subcode: Option<i64>, message: &str, kind: &str) -> Value {
    let mut error = json!({"message": message, "code": code, "type": kind});
    if let Some(subcode) = subcode {
        error["error_subcode"] = json!(subcode);
    }
    json!({ "error": error })
}

fn me_response(access_token: Option<&str>) -> (u16, Value) {
    match access_token {
        Some(token) if !token.is_empty() => (200, json!({"id": "1", "name": "Mock User"})),
        _ => (
            400,
            graph_error(
                190,
                None,
                "An active access token must be used to query information about the current user.",
                "OAuthException",
            ),
        ),
    }
}

fn busy_response() -> (u16, Value) {
    (400, graph_error(1, Some(463), "Server is busy", "GraphMethodException"))
}

fn flaky_response(state: &AppState) -> (u16, Value) {
    if state.flaky_calls.fetch_add(1, Ordering::SeqCst) == 0 {
        (
            503,
            graph_error(2, None, "Service temporarily unavailable", "GraphMethodException"),
        )
    } else {
        (200, json!({"id": "flaky", "ok": true}))
    }
}

fn echo_response(received: Value) -> (u16, Value) {
    (200, json!({"id": Uuid::new_v4().to_string(), "received": received}))
}

async fn me(Query(query): Query<HashMap<String, String>>) -> Reply {
    reply(me_response(query.get("access_token").map(String::as_str)))
}

async fn busy() -> Reply {
    reply(busy_response())
}

async fn flaky(State(state): State<SharedState>) -> Reply {
    reply(flaky_response(&state))
}

async fn echo(headers: HeaderMap, body: Bytes) -> Reply {
    match decode_json_body(&headers, &body) {
        Ok(received) => reply(echo_response(received)),
        Err(message) => reply((400, graph_error(100, None, &message, "GraphMethodException"))),
    }
}

async fn batch(State(state): State<SharedState>, headers: HeaderMap, body: Bytes) -> Reply {
    let envelope = match decode_json_body(&headers, &body) {
        Ok(envelope) => envelope,
        Err(message) => return reply((400, graph_error(100, None, &message, "GraphMethodException"))),
    };
    let Some(entries) = envelope
        .get("batch")
        .and_then(Value::as_str)
        .and_then(|text| serde_json::from_str::<Vec<BatchEntry>>(text).ok())
    else {
        return reply((
            400,
            graph_error(100, None, "The parameter batch is required", "GraphMethodException"),
        ));
    };
    let envelope_token = envelope.get("access_token").and_then(Value::as_str);

    let results: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let (status, body) = answer_entry(&state, entry, envelope_token);
            json!({"code": status, "body": body.to_string()})
        })
        .collect();
    reply((200, Value::Array(results)))
}

fn answer_entry(state: &AppState, entry: &BatchEntry, envelope_token: Option<&str>) -> (u16, Value) {
    let (path, query) = entry
        .relative_url
        .split_once('?')
        .unwrap_or((entry.relative_url.as_str(), ""));
    let query = parse_form(query);
    let path = path.trim_start_matches('/');

    match (entry.method.as_str(), path) {
        ("GET", "me") => {
            let token = query.get("access_token").map(String::as_str).or(envelope_token);
            me_response(token)
        }
        ("GET", "busy") => busy_response(),
        ("GET", "flaky") => flaky_response(state),
        ("POST", _) => {
            let form = entry.body.as_deref().map(parse_form).unwrap_or_default();
            let received: Map<String, Value> = form.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            echo_response(Value::Object(received))
        }
        _ => (
            404,
            graph_error(803, None, &format!("Unknown path components: /{path}"), "OAuthException"),
        ),
    }
}

fn decode_json_body(headers: &HeaderMap, body: &[u8]) -> Result<Value, String> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with("multipart/") {
        return Err("multipart bodies are not supported by the mock server".to_string());
    }

    let gzipped = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|encoding| encoding.eq_ignore_ascii_case("gzip"));
    let raw = if gzipped {
        let mut decoded = Vec::new();
        GzDecoder::new(body)
            .read_to_end(&mut decoded)
            .map_err(|e| format!("invalid gzip body: {e}"))?;
        decoded
    } else {
        body.to_vec()
    };
    if raw.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(&raw).map_err(|e| format!("invalid JSON body: {e}"))
}

fn parse_form(text: &str) -> HashMap<String, String> {
    text.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(text: &str) -> String {
    urlencoding::decode(text)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn me_requires_a_token() {
        assert_eq!(me_response(Some("abc")).0, 200);
        let (status, body) = me_response(None);
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], 190);
    }

    #[test]
    fn flaky_fails_once() {
        let state = AppState::default();
        assert_eq!(flaky_response(&state).0, 503);
        assert_eq!(flaky_response(&state).0, 200);
        assert_eq!(flaky_response(&state).0, 200);
    }

    #[test]
    fn batch_entries_fall_back_to_envelope_token() {
        let state = AppState::default();
        let entry: BatchEntry = serde_json::from_value(json!({"relative_url": "me?fields=id"})).unwrap();
        assert_eq!(entry.method, "GET");
        assert_eq!(answer_entry(&state, &entry, Some("token")).0, 200);
        assert_eq!(answer_entry(&state, &entry, None).0, 400);
    }

    #[test]
    fn post_entries_echo_their_form_body() {
        let state = AppState::default();
        let entry: BatchEntry = serde_json::from_value(json!({
            "method": "POST",
            "relative_url": "me/feed",
            "body": "message=hello%20world",
            "name": "post"
        }))
        .unwrap();
        let (status, body) = answer_entry(&state, &entry, None);
        assert_eq!(status, 200);
        assert_eq!(body["received"]["message"], "hello world");
    }

    #[test]
    fn form_decoding() {
        let form = parse_form("a=1&b=x%7Cy&c");
        assert_eq!(form["a"], "1");
        assert_eq!(form["b"], "x|y");
        assert_eq!(form["c"], "");
    }
}
