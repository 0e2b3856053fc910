use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // configuration
    #[error("invalid overtime setting {setting_id}: {reason}")]
    InvalidOvertimeSetting { setting_id: u64, reason: String },

    #[error("no applicable shift for user {user_id} on {date}")]
    NoApplicableShift { user_id: u64, date: chrono::NaiveDate },

    #[error("configuration error: {0}")]
    Config(String),

    // invariant violations
    #[error("insufficient usable balance on leave account {account_id}: requested {requested}, usable {usable}")]
    InsufficientBalance {
        account_id: u64,
        requested: f64,
        usable: f64,
    },

    #[error("compensatory over-consumption on leave account {account_id}: requested {requested}, remaining {remaining}")]
    CompensatoryOverConsumption {
        account_id: u64,
        requested: f64,
        remaining: f64,
    },

    #[error("compensatory over-refund on leave account {account_id}: requested {requested}, consumed {consumed}")]
    CompensatoryOverRefund {
        account_id: u64,
        requested: f64,
        consumed: f64,
    },

    #[error("invalid balance: {0}")]
    InvalidBalance(String),

    // state
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("{0} not found")]
    NotFound(String),

    // infrastructure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("task queue error: {0}")]
    Queue(String),
}

impl AppError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        AppError::NotFound(what.to_string())
    }

    /// Configuration and invariant failures are expected outcomes of a
    /// business operation; everything else is an infrastructure fault.
    pub fn is_business(&self) -> bool {
        !matches!(
            self,
            AppError::Database(_) | AppError::Migration(_) | AppError::Queue(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidOvertimeSetting { .. }
            | AppError::NoApplicableShift { .. }
            | AppError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InsufficientBalance { .. }
            | AppError::CompensatoryOverConsumption { .. }
            | AppError::CompensatoryOverRefund { .. }
            | AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::InvalidBalance(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Migration(_) | AppError::Queue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.is_business() {
            HttpResponse::build(self.status_code()).json(json!({
                "message": self.to_string()
            }))
        } else {
            tracing::error!(error = %self, "Request failed");
            HttpResponse::build(self.status_code()).json(json!({
                "message": "Internal Server Error"
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_errors_map_to_conflict() {
        let err = AppError::InsufficientBalance {
            account_id: 7,
            requested: 2.0,
            usable: 1.5,
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.is_business());
    }

    #[test]
    fn database_errors_hide_details() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_business());
    }
}
