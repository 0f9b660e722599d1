//! Error types and HTTP error response handling.
//!
//! API routes return `AppError` directly and get a JSON body. Page routes catch
//! the error at the front controller and render it inside the site layout,
//! using the same status code and public message.

use crate::query::QueryError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed. Details are logged, never shown.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem operation failed (file browser storage).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The current user may not use this page.
    #[error("Access denied")]
    AccessDenied,

    /// POST without the session's form token.
    #[error("Invalid token. Please reload the page and try again.")]
    InvalidToken,

    /// The client address is blacklisted for write requests.
    #[error("Your request could not be processed")]
    Blacklisted,

    #[error("Not found")]
    NotFound,

    /// The page has no handler for the requested verb/action.
    #[error("Method not available")]
    MethodNotAvailable,

    #[error("Invalid request")]
    InvalidRequest(String),

    /// A stored criteria fragment could not be turned into SQL.
    #[error("Invalid mailing criteria: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("Your message does not have any mailing lists selected.")]
    NoMailingLists,

    /// Social login provider rejected the credentials.
    #[error("Could not sign in: {0}")]
    SocialAuth(String),

    /// Outbound HTTP (relay, reCAPTCHA, OAuth) failed.
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AccessDenied | AppError::InvalidToken | AppError::Blacklisted => {
                StatusCode::FORBIDDEN
            }
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAvailable => StatusCode::METHOD_NOT_ALLOWED,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidQuery(_) | AppError::NoMailingLists => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::SocialAuth(_) => StatusCode::UNAUTHORIZED,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Io(_) => "internal_error",
            AppError::AccessDenied => "access_denied",
            AppError::InvalidToken => "invalid_token",
            AppError::Blacklisted => "blacklisted",
            AppError::NotFound => "not_found",
            AppError::MethodNotAvailable => "method_not_available",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::InvalidQuery(_) => "invalid_criteria",
            AppError::NoMailingLists => "no_mailing_lists",
            AppError::SocialAuth(_) => "social_auth_failed",
            AppError::Upstream(_) => "upstream_error",
        }
    }

    /// Message safe to show to the client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Io(_) => "An internal error occurred".to_string(),
            AppError::Upstream(_) => "An external service could not be reached".to_string(),
            AppError::InvalidRequest(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Log server-side failures with their details.
    pub fn log(&self) {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
    }
}

/// Convert AppError into a JSON HTTP response.
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.public_message()
            }
        }));

        (self.status_code(), body).into_response()
    }
}
