use crate::{
    services::{
        key_service::KeyError, share_service::ShareError, signature::AuthError,
        storage_service::StorageError,
    },
    utils::paths::PathError,
};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, time::Duration};

/// Error returned by every handler, rendered as
/// `{"error": {"code", "message"}, "status"}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub requires_password: bool,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            retry_after: None,
            requires_password: false,
        }
    }

    /// Log the detail and answer with a generic 500.
    pub fn internal(detail: impl fmt::Display) -> Self {
        tracing::error!(error = %detail, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal",
            "internal server error",
        )
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidInput", msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFound", msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "Conflict", msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden", msg)
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimited",
                "too many requests",
            )
        }
    }

    pub fn range_not_satisfiable(size: u64) -> Self {
        Self::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            "RangeNotSatisfiable",
            format!("requested range not satisfiable for {} bytes", size),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": { "code": self.code, "message": self.message },
            "status": self.status.as_u16()
        });
        if self.requires_password {
            body["requiresPassword"] = json!(true);
        }

        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after {
            // Whole seconds, rounded up.
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(format!("{:#}", err))
    }
}

impl From<PathError> for AppError {
    fn from(err: PathError) -> Self {
        AppError::invalid(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::BucketNotFound(_)
            | StorageError::ObjectNotFound { .. }
            | StorageError::PathNotFound(_)
            | StorageError::TrashEntryNotFound(_) => AppError::not_found(err.to_string()),
            StorageError::BucketAlreadyExists(_)
            | StorageError::AlreadyExists(_)
            | StorageError::Conflict(_) => AppError::conflict(err.to_string()),
            StorageError::BucketNotEmpty(_) => {
                AppError::new(StatusCode::CONFLICT, "NotEmpty", err.to_string())
            }
            StorageError::ReadOnlyPath(_) => AppError::forbidden(err.to_string()),
            StorageError::InvalidPath(inner) => AppError::from(inner),
            StorageError::InvalidInput(msg) => AppError::invalid(msg),
            StorageError::TooLarge => AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "InvalidInput",
                err.to_string(),
            ),
            StorageError::Sqlx(_) | StorageError::Io(_) => AppError::internal(err),
        }
    }
}

impl From<KeyError> for AppError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::InvalidInput(msg) => AppError::invalid(msg),
            KeyError::NotFound(_) => AppError::not_found(err.to_string()),
            KeyError::SecretMismatch(_) | KeyError::Sqlx(_) => AppError::internal(err),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::BucketOutOfScope(_) | AuthError::ReadOnly => {
                AppError::forbidden(err.to_string())
            }
            AuthError::Internal(_) => AppError::internal(err),
            _ => AppError::unauthorized(err.to_string()),
        }
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::NotFound => AppError::not_found(err.to_string()),
            ShareError::Expired => AppError::new(StatusCode::GONE, "Gone", err.to_string()),
            ShareError::PasswordRequired => AppError {
                requires_password: true,
                ..AppError::unauthorized(err.to_string())
            },
            ShareError::WrongPassword => AppError::unauthorized(err.to_string()),
            ShareError::InvalidInput(msg) => AppError::invalid(msg),
            ShareError::Storage(inner) => AppError::from(inner),
            ShareError::Hash(_) | ShareError::Sqlx(_) => AppError::internal(err),
        }
    }
}
