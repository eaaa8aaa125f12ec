use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    repository::orders::{RepoError, UniqueField},
    response::ApiResponse,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Conflict {0}")]
    Conflict(String),

    #[error(transparent)]
    Payment(#[from] PaymentVerificationError),

    /// Operator misconfiguration. The detail is logged, never returned.
    #[error("Payment configuration error")]
    Configuration(String),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

/// Reasons a gateway payment is refused. None of these create an order.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentVerificationError {
    #[error("Payment amount does not match order total")]
    AmountMismatch {
        expected: i64,
        captured: Option<i64>,
    },

    #[error("Payment has not succeeded (status: {0})")]
    IntentNotSuccessful(String),

    #[error("Payment intent not found")]
    IntentNotFound,

    #[error("Payment intent belongs to a different user")]
    IntentOwnerMismatch,

    #[error("Payment intent has already been used for another order")]
    TransactionReused,

    #[error("Payment gateway unavailable")]
    GatewayUnavailable(String),

    #[error("Payment gateway timed out")]
    GatewayTimeout,
}

impl PaymentVerificationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AmountMismatch { .. } | Self::IntentOwnerMismatch | Self::TransactionReused => {
                StatusCode::CONFLICT
            }
            Self::IntentNotSuccessful(_) => StatusCode::PAYMENT_REQUIRED,
            Self::IntentNotFound => StatusCode::BAD_REQUEST,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate(UniqueField::IdempotencyKey) => {
                AppError::Conflict("Idempotency key already used".into())
            }
            RepoError::Duplicate(UniqueField::TransactionId) => {
                AppError::Payment(PaymentVerificationError::TransactionReused)
            }
            RepoError::Db(err) => AppError::OrmError(err),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Payment(err) => err.status_code(),
            AppError::Configuration(_)
            | AppError::DbError(_)
            | AppError::OrmError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::Configuration(detail) => {
                tracing::error!(detail = %detail, "payment configuration error");
            }
            AppError::DbError(err) => tracing::error!(error = %err, "database error"),
            AppError::OrmError(err) => tracing::error!(error = %err, "orm error"),
            AppError::Internal(err) => tracing::error!(error = %err, "internal error"),
            _ => {}
        }

        let message = self.to_string();
        let body = ApiResponse::failure(
            message.clone(),
            Some(ErrorData { error: message }),
        );

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_errors_map_to_expected_statuses() {
        let mismatch = AppError::from(PaymentVerificationError::AmountMismatch {
            expected: 2000,
            captured: Some(1000),
        });
        assert_eq!(mismatch.status_code(), StatusCode::CONFLICT);
        assert!(mismatch.to_string().to_lowercase().contains("payment amount does not match"));

        let reused = AppError::from(RepoError::Duplicate(UniqueField::TransactionId));
        assert_eq!(reused.status_code(), StatusCode::CONFLICT);
        assert!(reused.to_string().contains("already been used"));

        assert_eq!(
            AppError::from(PaymentVerificationError::GatewayTimeout).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::from(PaymentVerificationError::IntentNotSuccessful("processing".into()))
                .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
    }

    #[test]
    fn configuration_error_hides_detail() {
        let err = AppError::Configuration("STRIPE_SECRET_KEY is not configured".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("STRIPE_SECRET_KEY"));
    }
}
