//! Human-readable rendering of backend error bodies.

use serde_json::Value;

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pulls a one-line summary out of the error shapes our backends return:
/// `{"error": "...", "details": "..."}` from the dual-loop relay,
/// `{"detail": "..."}` from the API service and OpenAI-style
/// `{"error": {"message": "..."}}` from local engines.
pub fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(Value::as_str).map(|error| {
                match value.get("details").and_then(Value::as_str) {
                    Some(details) if !details.trim().is_empty() => {
                        format!("{error} ({})", details.trim())
                    }
                    _ => error.to_string(),
                }
            })
        })
        .or_else(|| value.get("detail").and_then(Value::as_str).map(str::to_owned))
        .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_owned));

    summary
        .map(|text| collapse_whitespace(&text))
        .filter(|text| !text.is_empty())
}

/// Formats an error body as a summary line followed by a fenced dump.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            return match extract_error_summary(&json_value) {
                Some(summary) => format!("API Error: {summary}\n```json\n{pretty_json}\n```"),
                None => format!("API Error:\n```json\n{pretty_json}\n```"),
            };
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{trimmed}\n```")
    } else {
        format!("API Error:\n```\n{trimmed}\n```")
    }
}

/// Single-line variant for status lines and logs.
pub fn summarize_api_error(status: u16, error_text: &str) -> String {
    let trimmed = error_text.trim();
    let summary = serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .unwrap_or_else(|| collapse_whitespace(trimmed));
    if summary.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {summary}")
    }
}
