use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Bad or missing caller input.
    #[error("{0}")]
    Validation(String),

    /// The caller is not on the admin allowlist.
    #[error("{0}")]
    Forbidden(String),

    /// Client-credentials exchange failed.
    #[error("token exchange failed{}: {body}", fmt_status(.status))]
    Auth { status: Option<u16>, body: String },

    /// Listing, download or passthrough call failed.
    #[error("upstream request failed{}: {message}", fmt_status(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("{0}")]
    NotFound(String),

    /// Schedule CSV could not be read, parsed or written.
    #[error("schedule storage error: {0}")]
    Storage(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {code})"),
        None => String::new(),
    }
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn transport(error: reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            format!("request timed out: {error}")
        } else {
            error.to_string()
        };
        Self::Upstream {
            status: error.status().map(|status| status.as_u16()),
            message,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Auth { .. } | Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<csv::Error> for GatewayError {
    fn from(error: csv::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{self}");
        } else {
            tracing::debug!(status = status.as_u16(), "{self}");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
