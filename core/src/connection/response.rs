//! Splitting a response body back into per-request results.

use serde_json::{json, Value};

use crate::error::{GraphApiError, GraphError};
use crate::http::HttpResponse;
use crate::logging::{EventLogger, Logger, LoggingBehavior};
use crate::recovery::{ErrorCategory, ErrorConfigurationProvider, ErrorDescriptor, GRAPH_ERROR_DOMAIN};
use crate::request::GraphRequest;

/// Key used to wrap a response body that is not a JSON object.
pub const NON_JSON_RESULT_KEY: &str = "FACEBOOK_NON_JSON_RESULT";

pub(crate) const INVALID_UTF8_EVENT: &str = "fb_response_invalid_utf8";

/// One result per request, in request order.
///
/// Each successful result is a `{"code": <status>, "body": <json>}` entry.
/// Undecodable bodies give every request an `InvalidResponse`. A plain
/// response answers only the first request, and a batch array shorter than
/// the request list leaves the tail with `MissingResponse`.
pub(crate) fn parse_results(
    response: &HttpResponse,
    count: usize,
    batched: bool,
    logger: &dyn Logger,
    events: &dyn EventLogger,
) -> Vec<Result<Value, GraphError>> {
    let every = |err: GraphError| -> Vec<Result<Value, GraphError>> { (0..count).map(|_| Err(err.clone())).collect() };

    let Ok(text) = std::str::from_utf8(&response.body) else {
        events.log_internal_event(INVALID_UTF8_EVENT, true);
        return every(GraphError::InvalidResponse("response body is not valid UTF-8".to_string()));
    };
    let parsed: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            logger.log(
                LoggingBehavior::DeveloperErrors,
                &format!("Failed to parse Graph API response: {e}"),
            );
            return every(GraphError::InvalidResponse(e.to_string()));
        }
    };

    if !batched {
        let mut entry = Some(json!({"code": response.status, "body": wrap_non_object(parsed)}));
        return (0..count)
            .map(|index| entry.take().ok_or(GraphError::MissingResponse { index }))
            .collect();
    }

    match parsed {
        Value::Array(entries) => {
            let mut entries = entries.into_iter();
            (0..count)
                .map(|index| match entries.next() {
                    Some(entry) => Ok(normalize_batch_entry(entry)),
                    None => Err(GraphError::MissingResponse { index }),
                })
                .collect()
        }
        // the whole batch was rejected, e.g. a bad envelope token
        body @ Value::Object(_) if body.get("error").is_some() => {
            let entry = json!({"code": response.status, "body": body});
            (0..count).map(|_| Ok(entry.clone())).collect()
        }
        _ => (0..count).map(|index| Err(GraphError::MissingResponse { index })).collect(),
    }
}

fn wrap_non_object(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => json!({ NON_JSON_RESULT_KEY: other }),
    }
}

/// Batch entries carry their body as JSON text.
fn normalize_batch_entry(mut entry: Value) -> Value {
    if let Some(body) = entry.get_mut("body") {
        if let Value::String(text) = body {
            let reparsed = serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.clone()));
            *body = match reparsed {
                Value::Null => Value::Null,
                other => wrap_non_object(other),
            };
        }
    }
    entry
}

/// Write `body.__debug__.messages` to the logger.
pub(crate) fn log_debug_messages(result: &Value, logger: &dyn Logger) {
    let Some(messages) = result.pointer("/body/__debug__/messages").and_then(Value::as_array) else {
        return;
    };
    for message in messages {
        let Some(text) = message.get("message").and_then(Value::as_str) else {
            continue;
        };
        let behavior = match message.get("type").and_then(Value::as_str) {
            Some("warning") => LoggingBehavior::GraphApiDebugWarning,
            _ => LoggingBehavior::GraphApiDebugInfo,
        };
        let entry = match message.get("link").and_then(Value::as_str) {
            Some(link) => format!("{text} Link: {link}"),
            None => text.to_string(),
        };
        logger.log(behavior, &entry);
    }
}

/// Build a typed error from a result entry whose body holds an `error`
/// object.
///
/// `provider` is `None` when classification must be skipped.
pub(crate) fn error_from_result(
    result: &Value,
    request: &GraphRequest,
    provider: Option<&dyn ErrorConfigurationProvider>,
) -> Option<GraphApiError> {
    let error = result.get("body")?.get("error")?.as_object()?;
    let text = |key: &str| error.get(key).and_then(Value::as_str).map(str::to_string);

    let code = error.get("code").and_then(Value::as_i64);
    let subcode = error.get("error_subcode").and_then(Value::as_i64);
    let configuration = provider.and_then(|provider| {
        provider.recovery_configuration(&ErrorDescriptor {
            domain: GRAPH_ERROR_DOMAIN,
            code,
            subcode,
            request,
        })
    });
    let category = if error.get("is_transient").and_then(Value::as_bool) == Some(true) {
        Some(ErrorCategory::Transient)
    } else {
        configuration.as_ref().map(|c| c.category)
    };

    let mut api = GraphApiError {
        message: text("message").or_else(|| text("error_reason")).or_else(|| text("error_msg")),
        code,
        subcode,
        http_status: result
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|status| u16::try_from(status).ok()),
        error_type: text("type"),
        user_title: text("error_user_title"),
        user_message: text("error_user_msg"),
        category,
        raw: result.clone(),
        ..GraphApiError::default()
    };
    if category == Some(ErrorCategory::Transient) {
        if let Some(configuration) = configuration {
            api.recovery_description = Some(configuration.recovery_description);
            api.recovery_options = configuration.recovery_options;
            api.recovery_action_name = Some(configuration.recovery_action_name);
        }
    }
    Some(api)
}
