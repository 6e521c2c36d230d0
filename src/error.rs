use crate::models::UserRole;
use crate::permissions::Action;

pub type Result<T> = std::result::Result<T, RegisterError>;

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("document reference '{0}' already exists")]
    DuplicateReference(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("role {role} is not permitted to perform {action}")]
    PermissionDenied { action: Action, role: UserRole },

    #[error("shared database is busy")]
    StorageBusy,

    #[error("shared database is unavailable")]
    StorageUnavailable,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("password hashing failed")]
    Hash,

    #[error("export cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RegisterError {
    pub fn validation(message: impl Into<String>) -> Self {
        RegisterError::Validation(message.into())
    }
}

impl From<diesel::result::Error> for RegisterError {
    fn from(value: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match value {
            Error::NotFound => RegisterError::NotFound("record"),
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                RegisterError::Constraint(info.message().to_string())
            }
            Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                RegisterError::Constraint(info.message().to_string())
            }
            Error::DatabaseError(_, info) if info.message().contains("database is locked") => {
                RegisterError::StorageBusy
            }
            other => {
                tracing::error!(error = %other, "database error");
                RegisterError::StorageUnavailable
            }
        }
    }
}

impl From<diesel::r2d2::PoolError> for RegisterError {
    fn from(value: diesel::r2d2::PoolError) -> Self {
        tracing::error!(error = %value, "failed to get connection from pool");
        RegisterError::StorageUnavailable
    }
}
