use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by every HTTP endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable error kind (e.g., "INSUFFICIENT_STOCK")
    pub kind: ErrorKind,
    /// Human-readable detail naming the offending product or order
    pub message: String,
    /// RFC 3339 timestamp of when the error was rendered
    pub timestamp: String,
}

/// Machine-readable classification carried by every [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InvalidBom,
    InvalidQuantity,
    InsufficientStock,
    DuplicateReference,
    ConflictingUpdate,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid BOM: {0}")]
    InvalidBom(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Insufficient stock for {product}: required {required}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        product: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    #[error("Conflicting update: {0}")]
    ConflictingUpdate(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InvalidBom(_) => ErrorKind::InvalidBom,
            Self::InvalidQuantity(_) => ErrorKind::InvalidQuantity,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::DuplicateReference(_) => ErrorKind::DuplicateReference,
            Self::ConflictingUpdate(_) => ErrorKind::ConflictingUpdate,
            Self::DatabaseError(_) | Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidQuantity(_) => StatusCode::BAD_REQUEST,
            Self::InvalidState(_) | Self::DuplicateReference(_) | Self::ConflictingUpdate(_) => {
                StatusCode::CONFLICT
            }
            Self::InvalidBom(_) | Self::InsufficientStock { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Datastore failures return a generic message to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// True for the compare-and-swap failure the transaction coordinator retries.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConflictingUpdate(_))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            kind: self.kind(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rust_decimal_macros::dec;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InvalidState("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InvalidQuantity("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidBom("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::DuplicateReference("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn insufficient_stock_names_component_and_quantities() {
        let err = ServiceError::InsufficientStock {
            product_id: Uuid::nil(),
            product: "Sugar (SUGAR-1)".into(),
            required: dec!(1.00),
            available: dec!(0.50),
        };

        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(
            err.response_message(),
            "Insufficient stock for Sugar (SUGAR-1): required 1.00, available 0.50"
        );
    }

    #[test]
    fn response_message_hides_datastore_details() {
        let err = ServiceError::DatabaseError(DbErr::Custom("connection refused".into()));
        assert_eq!(err.response_message(), "Database error");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn error_response_carries_kind() {
        let response = ServiceError::ConflictingUpdate("product balance changed".into())
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.kind, ErrorKind::ConflictingUpdate);
        assert_eq!(payload.error, "Conflict");
    }
}
