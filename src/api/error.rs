//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::DatabaseError;
use crate::extraction::ExtractionError;
use crate::pipeline::PipelineError;
use crate::schema::CorrectionError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Extraction rejected: {0}")]
    Unprocessable(String),
    #[error("Model tier unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "CONFLICT", detail.clone()),
            ApiError::Unprocessable(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "EXTRACTION_REJECTED",
                detail.clone(),
            ),
            ApiError::ModelUnavailable(detail) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "MODEL_UNAVAILABLE",
                detail.clone(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{entity} {id}"))
            }
            DatabaseError::Correction(detail) => ApiError::BadRequest(detail.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::SchemaValidation(detail) => ApiError::Unprocessable(detail),
            ExtractionError::JsonParsing(detail) | ExtractionError::MalformedResponse(detail) => {
                ApiError::Unprocessable(detail)
            }
            ExtractionError::Connection(detail) => ApiError::ModelUnavailable(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::RunInFlight { .. } => ApiError::Conflict(err.to_string()),
            PipelineError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{entity} {id}"))
            }
            PipelineError::Database(db) => db.into(),
            PipelineError::Extraction(ex) => ex.into(),
            PipelineError::Shutdown => ApiError::Internal("shutting down".to_string()),
        }
    }
}

impl From<CorrectionError> for ApiError {
    fn from(err: CorrectionError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn lease_conflict_maps_to_409() {
        let err: ApiError = PipelineError::RunInFlight {
            contract_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
        }
        .into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn schema_validation_maps_to_422() {
        let err: ApiError = ExtractionError::SchemaValidation("vendor missing".into()).into();
        assert!(matches!(err, ApiError::Unprocessable(_)));
    }

    #[test]
    fn db_not_found_maps_to_404() {
        let err: ApiError = DatabaseError::NotFound {
            entity: "contract",
            id: "x".into(),
        }
        .into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
