use thiserror::Error;

use crate::auth::password::HashError;
use crate::auth::validation::ValidationError;

/// Failures surfaced by [`crate::users::UserStore`].
///
/// Low-level `sqlx` errors are converted at the store boundary and never
/// returned as-is.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open backing store: {0}")]
    ConnectionFailure(String),

    #[error("cannot create user table: {0}")]
    SchemaFailure(String),

    #[error("user already exists: {0}")]
    DuplicateKey(String),

    #[error("user with id {0} not found")]
    NotFound(i64),

    #[error("incorrect confirmation code, backing store was not deleted")]
    InvalidCode,

    #[error("invalid user data: {0}")]
    ValidationFailure(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("password hashing failed: {0}")]
    HashFailure(#[from] HashError),
}

impl StoreError {
    /// Translate a query error, keeping unique-constraint violations distinct.
    pub(crate) fn from_query(err: sqlx::Error, context: &str) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return StoreError::DuplicateKey(format!("{context}: {}", db_err.message()));
            }
        }
        StoreError::Storage(format!("{context}: {err}"))
    }
}
