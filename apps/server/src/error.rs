use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::graph::{SendRejection, TransitionError};
use crate::media::MediaError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Media(#[from] MediaError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    error: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            ApiError::Media(MediaError::UnsupportedType(_)) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media")
            }
            ApiError::Media(MediaError::TooLarge { .. }) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large")
            }
            ApiError::Media(MediaError::Empty | MediaError::InvalidPath(_)) => {
                (StatusCode::BAD_REQUEST, "validation")
            }
            ApiError::Media(MediaError::Io(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        ApiError::Conflict(err.to_string())
    }
}

impl From<SendRejection> for ApiError {
    fn from(err: SendRejection) -> Self {
        match err {
            SendRejection::EmptyEmail | SendRejection::SelfRequest => {
                ApiError::Validation(err.to_string())
            }
            SendRejection::AlreadySent
            | SendRejection::AlreadyReceived
            | SendRejection::AlreadyFriends => ApiError::Conflict(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            ApiError::Database(err) => {
                tracing::error!(component = "api", error = %err, "database operation failed");
                "Database error".to_string()
            }
            ApiError::Media(MediaError::Io(err)) => {
                tracing::error!(component = "api", error = %err, "media storage failed");
                "Storage error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { code, error: message })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FriendRequestStatus;

    #[test]
    fn maps_errors_to_status_codes() {
        assert_eq!(
            ApiError::InvalidToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("Post").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::validation("bad").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Media(MediaError::TooLarge {
                limit: 10,
                actual: 11
            })
            .into_response()
            .status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn terminal_transition_becomes_conflict() {
        let err: ApiError = TransitionError::AlreadyResolved(FriendRequestStatus::Accepted).into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(ApiError::NotFound("Friend request").to_string(), "Friend request not found");
    }
}
