use axum::http::StatusCode;
use serde_json::Value;

pub const FALLBACK_MESSAGE: &str = "NASA API Error";
pub const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable";
pub const TIMEOUT_MESSAGE: &str = "Request timeout";
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// A failed upstream call in its final, client-facing shape.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub status: u16,
    pub message: String,
    pub details: Option<Value>,
}

impl UpstreamError {
    fn new(status: u16, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            status,
            message: message.into(),
            details,
        }
    }

    /// Upstream answered with a non-success status. The message is taken
    /// from the body when the provider supplied one.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let details = match serde_json::from_slice::<Value>(body) {
            Ok(v) => Some(v),
            Err(_) if body.is_empty() => None,
            Err(_) => Some(Value::String(String::from_utf8_lossy(body).into_owned())),
        };
        let message = details
            .as_ref()
            .and_then(body_message)
            .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());
        Self::new(status, message, details).normalize()
    }

    /// No usable response: connection, DNS, timeout or body failures.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let details = Some(Value::String(err.to_string()));
        if err.is_timeout() {
            Self::new(408, TIMEOUT_MESSAGE, details)
        } else if err.is_connect() || err.is_request() {
            Self::new(503, UNAVAILABLE_MESSAGE, details)
        } else if let Some(status) = err.status() {
            Self::new(status.as_u16(), FALLBACK_MESSAGE, details).normalize()
        } else {
            Self::new(500, INTERNAL_MESSAGE, details)
        }
    }

    /// Clamps the shape to something an HTTP response can carry. Applying
    /// it to its own output changes nothing.
    pub fn normalize(mut self) -> Self {
        if !(400..=599).contains(&self.status) {
            self.status = 500;
        }
        if self.message.trim().is_empty() {
            self.message = if self.status == 500 {
                INTERNAL_MESSAGE.to_string()
            } else {
                FALLBACK_MESSAGE.to_string()
            };
        }
        self
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

fn body_message(body: &Value) -> Option<String> {
    let pick = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    pick(body.get("msg"))
        .or_else(|| pick(body.get("message")))
        .or_else(|| pick(body.get("error_message")))
        .or_else(|| pick(body.get("error").and_then(|e| e.get("message"))))
}
