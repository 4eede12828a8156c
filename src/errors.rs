use http::StatusCode;
use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

/// Error type shared by every service in the crate.
///
/// The first group of variants is the business-rule taxonomy surfaced
/// verbatim to callers; the rest covers infrastructure and lookup
/// failures. Business-rule failures are permanent and retrying them is
/// never appropriate. Only `DatabaseError` may wrap a transient fault
/// the caller can retry at transaction granularity.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Conservation violation: {0}")]
    ConservationViolation(String),

    #[error("Invalid production stage transition: {0}")]
    InvalidTransition(String),

    #[error("Production stage not ready: {0}")]
    StageNotReady(String),

    #[error("Duplicate billing: {0}")]
    DuplicateBilling(String),

    #[error("Overpayment rejected: {0}")]
    OverpaymentRejected(String),

    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Returns the HTTP status code the surrounding API layer should use
    /// for this error. This is the single source of truth for
    /// error-to-status mapping; the HTTP layer itself never re-classifies.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConservationViolation(_)
            | Self::OverpaymentRejected(_)
            | Self::DuplicateBilling(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidTransition(_)
            | Self::StageNotReady(_)
            | Self::ValidationError(_)
            | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateIdentity(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for user-facing responses.
    /// Infrastructure errors return generic messages to avoid leaking
    /// implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }

    /// Whether the failure is a permanent business-rule rejection, as
    /// opposed to an infrastructure fault the caller may retry.
    pub fn is_business_rejection(&self) -> bool {
        !matches!(
            self,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_map_to_4xx() {
        assert_eq!(
            ServiceError::ConservationViolation("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::OverpaymentRejected("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::DuplicateBilling("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InvalidTransition("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::StageNotReady("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::DuplicateIdentity("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn infrastructure_errors_map_to_5xx() {
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::db_error("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::db_error("connection refused").response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InternalError("stack trace".into()).response_message(),
            "Internal server error"
        );

        // Business rejections carry the full message for display.
        assert_eq!(
            ServiceError::ConservationViolation("only 2 units remaining".into())
                .response_message(),
            "Conservation violation: only 2 units remaining"
        );
    }

    #[test]
    fn business_rejections_are_not_retryable() {
        assert!(ServiceError::ConservationViolation("x".into()).is_business_rejection());
        assert!(ServiceError::DuplicateBilling("x".into()).is_business_rejection());
        assert!(!ServiceError::db_error("lock timeout").is_business_rejection());
    }
}
