//! Response validation
//!
//! Every body coming back from the table endpoints passes through
//! [`classify_body`] before anything else looks at it. A misconfigured server
//! commonly answers with the endpoint's own source code or an HTML error page
//! and a 200 status; those bodies are reported as [`FormatError::Markup`]
//! and never parsed further.

use chrono::{DateTime, Utc};
use serde_json::Value;

use qmsync_core::domain::TableName;
use qmsync_core::ports::{FormatError, PullPayload, PushAck, RemoteError};

/// Leading markers of bodies that are markup or script source
const MARKUP_MARKERS: &[&str] = &["<?php", "<script", "<!doctype", "<html"];

/// Characters of the offending body quoted in error messages
const SNIPPET_LEN: usize = 40;

/// Validates a raw response body and decodes it as JSON
///
/// - `text/html` content type, or a body starting with `<` (after
///   whitespace and a byte-order mark) → [`FormatError::Markup`]
/// - empty or malformed body → [`FormatError::InvalidJson`]
pub fn classify_body(content_type: Option<&str>, body: &str) -> Result<Value, FormatError> {
    let trimmed = body.trim_start_matches('\u{feff}').trim_start();

    if trimmed.starts_with('<') {
        let lower = trimmed
            .chars()
            .take(SNIPPET_LEN)
            .collect::<String>()
            .to_ascii_lowercase();
        let marker = MARKUP_MARKERS
            .iter()
            .find(|m| lower.starts_with(*m))
            .map(|m| m.to_string())
            .unwrap_or_else(|| snippet(trimmed));
        return Err(FormatError::Markup(marker));
    }

    if content_type
        .map(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
    {
        return Err(FormatError::Markup(format!("text/html: {}", snippet(trimmed))));
    }

    if trimmed.is_empty() {
        return Err(FormatError::InvalidJson("empty body".to_string()));
    }

    serde_json::from_str(trimmed).map_err(|e| FormatError::InvalidJson(e.to_string()))
}

/// Resolves a decoded pull response into [`PullPayload`]
pub fn normalize_pull(table: &TableName, value: Value) -> Result<PullPayload, RemoteError> {
    PullPayload::normalize(table, value)
}

/// Interprets the acknowledgement of a push: `{success, message?, timestamp?}`
pub fn parse_push_ack(value: Value) -> Result<PushAck, RemoteError> {
    let Value::Object(map) = value else {
        return Err(FormatError::UnexpectedShape("push response is not an object".into()).into());
    };

    let message = map
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);

    match map.get("success") {
        Some(Value::Bool(true)) => Ok(PushAck {
            message,
            timestamp: map
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }),
        Some(Value::Bool(false)) => Err(RemoteError::Application(
            message.unwrap_or_else(|| "server reported failure".to_string()),
        )),
        _ => Err(FormatError::UnexpectedShape("push response has no 'success' flag".into()).into()),
    }
}

/// First characters of a body, for error messages and logs
pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(SNIPPET_LEN).collect()
}
