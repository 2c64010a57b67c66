use serde_json::Value;

/// Failure modes of a backend call.
///
/// `Network` and `RequestFailed` are kept apart so callers can tell an
/// unreachable server from one that answered and refused.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// No response was received.
    #[error("Network error: {0}")]
    Network(String),
    /// The server answered with a non-2xx status.
    #[error("{message}")]
    RequestFailed { status: u16, message: String },
    /// Input rejected locally before any request was sent.
    #[error("{0}")]
    Validation(String),
    /// A 2xx response whose body did not have the expected shape.
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status for `RequestFailed`, `None` otherwise.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Build the error for a non-2xx response from its status line and body.
pub(crate) fn request_failed(status: u16, status_text: &str, body: &str) -> ApiError {
    let message = detail_message(body).unwrap_or_else(|| format!("HTTP {status}: {status_text}"));
    ApiError::RequestFailed { status, message }
}

/// Extract a human-readable `detail` from an error payload.
///
/// Plain strings are returned verbatim. Validation lists of the form
/// `[{"msg": ...}, ...]` are joined with `"; "`.
fn detail_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body.trim()).ok()?;
    let detail = parsed.get("detail")?;
    let message = match detail {
        Value::Null => return None,
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let messages: Vec<String> = items
                .iter()
                .map(|item| match item.get("msg").and_then(Value::as_str) {
                    Some(msg) => msg.to_string(),
                    None => item.to_string(),
                })
                .collect();
            messages.join("; ")
        }
        other => other.to_string(),
    };
    if message.trim().is_empty() {
        None
    } else {
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_detail_is_used_verbatim() {
        let err = request_failed(400, "Bad Request", r#"{"detail":"No training data available"}"#);
        assert_eq!(err.to_string(), "No training data available");
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn validation_list_messages_are_joined() {
        let body = r#"{"detail":[
            {"loc":["query","epochs"],"msg":"value is not a valid integer","type":"type_error"},
            {"loc":["body"],"msg":"field required","type":"missing"}
        ]}"#;
        let err = request_failed(422, "Unprocessable Entity", body);
        assert_eq!(
            err.to_string(),
            "value is not a valid integer; field required"
        );
    }

    #[test]
    fn unparsable_body_falls_back_to_status_line() {
        let err = request_failed(502, "Bad Gateway", "<html>upstream down</html>");
        assert_eq!(err.to_string(), "HTTP 502: Bad Gateway");
    }

    #[test]
    fn missing_or_blank_detail_falls_back_to_status_line() {
        assert_eq!(
            request_failed(404, "Not Found", r#"{"error":"nope"}"#).to_string(),
            "HTTP 404: Not Found"
        );
        assert_eq!(
            request_failed(500, "Internal Server Error", r#"{"detail":"  "}"#).to_string(),
            "HTTP 500: Internal Server Error"
        );
    }

    #[test]
    fn network_errors_are_distinct_from_rejections() {
        let err = ApiError::Network("connection refused".into());
        assert!(err.is_network());
        assert_eq!(err.status(), None);
        assert_eq!(err.to_string(), "Network error: connection refused");
    }
}
