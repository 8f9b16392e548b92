use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::{ItemId, ModelKind, UserId};

/// Errors raised by the recommendation core
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RecError {
    #[error("Cannot build a rating matrix from an empty dataset")]
    EmptyDataset,

    #[error("User {user_id} not found in dataset")]
    UnknownUser { user_id: UserId },

    #[error("Item {item_id} not found in dataset")]
    UnknownItem { item_id: ItemId },

    #[error("Unknown model: {name}. Available models: svd, nmf, item_knn, user_knn, content, ensemble")]
    UnknownModel { name: String },

    #[error("Model {model} is not trained")]
    ModelNotFitted { model: ModelKind },

    #[error("No ensemble member could score user {user_id}")]
    NoScorersAvailable { user_id: UserId },

    #[error("Rating value {value} is outside the valid range [1, 5]")]
    InvalidRatingValue { value: f64 },

    #[error("{operation} exceeded its deadline")]
    Timeout { operation: String },
}

pub type RecResult<T> = Result<T, RecError>;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Recommender(#[from] RecError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Recommender(err) => match err {
                RecError::UnknownUser { .. } | RecError::UnknownItem { .. } => {
                    StatusCode::NOT_FOUND
                }
                RecError::UnknownModel { .. } | RecError::InvalidRatingValue { .. } => {
                    StatusCode::BAD_REQUEST
                }
                RecError::EmptyDataset | RecError::NoScorersAvailable { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                RecError::ModelNotFitted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                RecError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_catalogue_entry_is_not_found() {
        let err = AppError::NotFound("Movie 42".to_string());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Not found: Movie 42");
    }

    #[test]
    fn test_unknown_user_maps_to_not_found() {
        let err = AppError::from(RecError::UnknownUser { user_id: 7 });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "User 7 not found in dataset");
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err = AppError::from(RecError::Timeout {
            operation: "recommendations".to_string(),
        });
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_not_fitted_maps_to_unavailable() {
        let err = AppError::from(RecError::ModelNotFitted {
            model: ModelKind::Content,
        });
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "Model content is not trained");
    }

    #[test]
    fn test_invalid_input_maps_to_bad_request() {
        let err = AppError::InvalidInput("n must be positive".to_string());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
