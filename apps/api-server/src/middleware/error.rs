//! Error handling middleware - RFC 7807 compliant responses.

use std::fmt;
use std::time::Duration;

use actix_web::http::{StatusCode, header};
use actix_web::{HttpResponse, ResponseError};
use stepwise_core::GateError;
use stepwise_core::domain::WindowPolicy;
use stepwise_core::error::RepoError;
use stepwise_core::rate_limit::{describe_wait, retry_after_secs};
use stepwise_shared::ErrorResponse;

/// Application-level error type that converts to RFC 7807 responses.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unauthorized,
    Internal(String),
    /// Admission denied; `window` picks the unit of the human-readable wait.
    RateLimited {
        retry_after: Duration,
        window: Duration,
    },
    UpstreamFailed(String),
    /// The provider answered, but not in a shape we can use.
    UnprocessableResult(String),
}

impl AppError {
    pub fn rate_limited(retry_after: Duration, policy: &WindowPolicy) -> Self {
        AppError::RateLimited {
            retry_after,
            window: policy.window(),
        }
    }

    /// Map a single-shot gate failure under `policy`.
    pub fn from_gate(err: GateError, policy: &WindowPolicy) -> Self {
        match err {
            GateError::RateLimited { retry_after } => Self::rate_limited(retry_after, policy),
            GateError::UpstreamFailed { reason } => AppError::UpstreamFailed(reason),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Unauthorized => write!(f, "Unauthorized"),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::RateLimited { retry_after, .. } => {
                write!(f, "Rate limited for {}s", retry_after_secs(*retry_after))
            }
            AppError::UpstreamFailed(msg) => write!(f, "Upstream failed: {}", msg),
            AppError::UnprocessableResult(msg) => write!(f, "Unprocessable result: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamFailed(_) | AppError::UnprocessableResult(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());

        let error = match self {
            AppError::NotFound(detail) => ErrorResponse::not_found(detail),
            AppError::BadRequest(detail) => ErrorResponse::bad_request(detail),
            AppError::Unauthorized => ErrorResponse::unauthorized(),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                ErrorResponse::internal_error()
            }
            AppError::RateLimited {
                retry_after,
                window,
            } => {
                let secs = retry_after_secs(*retry_after);
                response.insert_header((header::RETRY_AFTER, secs.to_string()));
                ErrorResponse::too_many_requests(
                    format!(
                        "Rate limit reached. Please try again in {}.",
                        describe_wait(*retry_after, *window)
                    ),
                    secs,
                )
            }
            AppError::UpstreamFailed(reason) => {
                tracing::warn!(reason = %reason, "Upstream request failed");
                ErrorResponse::bad_gateway("The assistant is unavailable right now. Please try again.")
            }
            AppError::UnprocessableResult(_) => {
                ErrorResponse::bad_gateway("Could not understand result. Please try again.")
            }
        };

        response.json(error)
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => AppError::NotFound("Resource not found".to_string()),
            RepoError::Constraint(msg) => AppError::BadRequest(msg),
            RepoError::Connection(msg) => {
                tracing::error!("Database connection error: {}", msg);
                AppError::Internal("Database error".to_string())
            }
            RepoError::Query(msg) => {
                tracing::error!("Database query error: {}", msg);
                AppError::Internal("Database error".to_string())
            }
        }
    }
}

/// Result type alias for handlers.
pub type AppResult<T> = Result<T, AppError>;
