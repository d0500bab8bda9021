//! Boundary error type and the JSON failure envelope.

use axum::{
    async_trait,
    body::Body,
    extract::{rejection::JsonRejection, FromRequest, OriginalUri, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::error;

use crate::{
    auth::error::AuthError, nasa::error::UpstreamError, state::AppState,
    users::validate::ValidationError,
};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(e) => e.status_code(),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Validation(e) => e.details(),
            Self::Upstream(e) => e.details.clone(),
            _ => None,
        }
    }

    fn debug(&self) -> Option<String> {
        match self {
            Self::Internal(e) => Some(format!("{e:#}")),
            _ => None,
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::InvalidToken => {
                AppError::Unauthorized(e.to_string())
            }
            AuthError::AccountLocked { .. } | AuthError::AccountDisabled => {
                AppError::Forbidden(e.to_string())
            }
            AuthError::Validation(v) => AppError::Validation(v),
            AuthError::NotFound(what) => AppError::NotFound(format!("{} not found", capitalize(what))),
            AuthError::Conflict(field) => {
                AppError::Conflict(format!("{} already registered", capitalize(field)))
            }
            AuthError::Store(s) => AppError::Internal(anyhow::Error::new(s)),
            AuthError::Internal(e) => AppError::Internal(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(ValidationError::new(rejection.body_text()))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// What the envelope middleware needs to finish an error body.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    message: String,
    details: Option<Value>,
    debug: Option<String>,
}

impl ErrorReport {
    fn bare(status: StatusCode) -> Self {
        Self {
            message: status
                .canonical_reason()
                .unwrap_or("Internal server error")
                .to_string(),
            details: None,
            debug: None,
        }
    }

    fn envelope(&self, status: StatusCode, verbose: bool, path: &str, method: &str) -> Value {
        let mut error = Map::new();
        error.insert("message".into(), Value::String(self.message.clone()));
        error.insert("status".into(), json!(status.as_u16()));
        if let Some(details) = &self.details {
            error.insert("details".into(), details.clone());
        }
        if verbose {
            if let Some(debug) = &self.debug {
                error.insert("debug".into(), Value::String(debug.clone()));
            }
        }
        json!({
            "success": false,
            "error": error,
            "timestamp": now_rfc3339(),
            "path": path,
            "method": method,
        })
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = ?self, %status, "request failed");
        }

        let report = ErrorReport {
            message: self.to_string(),
            details: self.details(),
            debug: self.debug(),
        };
        let body = json!({
            "success": false,
            "error": {"message": report.message, "status": status.as_u16()},
        });
        let mut res = (status, Json(body)).into_response();
        res.extensions_mut().insert(report);
        res
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Rewrites every 4xx/5xx response into the full failure envelope with
/// request context. Responses built outside `AppError` get a bare report.
pub async fn error_envelope(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|u| u.0.clone())
        .unwrap_or_else(|| req.uri().clone());
    let path = path
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.path().to_string());

    let res = next.run(req).await;
    let status = res.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return res;
    }

    let (mut parts, _) = res.into_parts();
    let report = parts
        .extensions
        .remove::<ErrorReport>()
        .unwrap_or_else(|| ErrorReport::bare(status));
    let body = report.envelope(status, state.config.environment.is_verbose(), &path, &method);

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(body.to_string()))
}

pub async fn not_found() -> AppError {
    AppError::NotFound("not found".into())
}

/// Response for a handler that panicked.
pub fn panic_response(_: Box<dyn std::any::Any + Send + 'static>) -> Response {
    AppError::Internal(anyhow::anyhow!("handler panicked")).into_response()
}

/// `Json` whose rejection is a 400 in the common envelope.
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(AppJson(value))
    }
}
