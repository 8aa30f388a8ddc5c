use crate::domain::eligibility::Denial;
use crate::domain::scoring::ScoringError;
use crate::services::file_store::FileStoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation { message: String, data: Option<Value> },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Assessment deadline has passed")]
    DeadlinePassed,
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            data: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, data: Value) -> Self {
        AppError::Validation {
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn unauthorized_user() -> Self {
        AppError::Forbidden("Unauthorized user".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::DeadlinePassed => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl From<ScoringError> for AppError {
    fn from(err: ScoringError) -> Self {
        AppError::Internal(anyhow::Error::new(err).context("assessment setup is corrupted"))
    }
}

impl From<FileStoreError> for AppError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::Rejected(reason) => AppError::validation(reason),
            other => {
                tracing::warn!("Attachment upload failed: {}", other);
                AppError::Upstream("File upload failed, please retry".to_string())
            }
        }
    }
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::NotFound => AppError::NotFound("Assessment not found".to_string()),
            Denial::Unauthorized => {
                AppError::Forbidden("Only active students of this institute can submit".to_string())
            }
            Denial::AlreadySubmitted => AppError::Conflict("already submitted".to_string()),
            Denial::DeadlinePassed => AppError::DeadlinePassed,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Validation { message, data } => match data {
                Some(data) => json!({ "message": message, "data": data }),
                None => json!({ "message": message }),
            },
            AppError::Internal(err) => {
                tracing::error!("Internal error: {:#}", err);
                json!({ "message": "Internal server error" })
            }
            other => json!({ "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

/// Maps a unique-constraint violation to `Conflict`, anything else to `Internal`.
pub fn conflict_on_unique(err: sqlx::Error, message: &str) -> AppError {
    let unique = err
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation());
    if unique {
        AppError::Conflict(message.to_string())
    } else {
        err.into()
    }
}

/// Maps a foreign-key violation to `Conflict`, anything else to `Internal`.
pub fn conflict_on_reference(err: sqlx::Error, message: &str) -> AppError {
    let referenced = err
        .as_database_error()
        .is_some_and(|db_err| db_err.is_foreign_key_violation());
    if referenced {
        AppError::Conflict(message.to_string())
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn internal_errors_are_opaque() {
        let err = AppError::Internal(anyhow::anyhow!("relation \"secret_table\" does not exist"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body, json!({ "message": "Internal server error" }));
    }

    #[tokio::test]
    async fn validation_carries_detail() {
        let err = AppError::validation_with("Validation error", json!({ "deadline": ["bad"] }));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["data"]["deadline"][0], "bad");
    }

    #[test]
    fn denials_map_to_status_codes() {
        assert_eq!(AppError::from(Denial::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::from(Denial::Unauthorized).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::from(Denial::AlreadySubmitted).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::from(Denial::DeadlinePassed).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn scoring_errors_are_internal() {
        let err = AppError::from(ScoringError::AnswerKeyIncomplete("3".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
