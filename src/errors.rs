use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Order {0} has no status history")]
    MissingHistory(Uuid),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

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

impl ServiceError {
    /// True for caller mistakes (bad input, unknown ids), false for storage
    /// or internal failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::ValidationError(_) | Self::InvalidStatus(_)
        )
    }

    /// Short machine-readable code, used in JSON output of the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidStatus(_) => "invalid_status",
            Self::MissingHistory(_) => "missing_history",
            Self::EventError(_) => "event_error",
            Self::MigrationError(_) => "migration_error",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }
}

pub type AppError = ServiceError;
