//! Error types for the Tandem HTTP layer.
//!
//! [`ApiError`] folds gateway failures, malformed identifiers and rejected
//! request bodies into one enum that renders as a JSON error body via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tandem_core::gateway::GatewayError;
use tandem_types::IdError;

/// Errors that can occur while serving a request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The space or item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The space is blocked by moderation.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Reason shown to the client.
        reason: String,
    },

    /// A path segment, header or body failed validation.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The item id is already taken or was used before.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server could not complete the request.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(msg) => Self::NotFound(msg),
            GatewayError::Forbidden { reason } => Self::Forbidden { reason },
            GatewayError::Validation(msg) => Self::Validation(msg),
            GatewayError::Conflict(msg) => Self::Conflict(msg),
            GatewayError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        Self::Validation(err.to_string())
    }
}

// Axum answers some body failures with 415 or 422; clients of this API
// only distinguish "bad request".
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Conflict(msg)
            | Self::Internal(msg) => msg,
            Self::Forbidden { reason } => reason,
        };
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), %message, "request failed");
        }

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_statuses() {
        let cases = [
            (GatewayError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                GatewayError::Forbidden {
                    reason: "spam".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (GatewayError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (GatewayError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                GatewayError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (gateway_error, expected) in cases {
            assert_eq!(ApiError::from(gateway_error).status(), expected);
        }
    }

    #[test]
    fn forbidden_body_carries_the_reason() {
        let response = ApiError::Forbidden {
            reason: "spam".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
