use genealogy_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A domain rule was violated; the wrapped error says which.
    #[error(transparent)]
    Domain(#[from] CoreError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A persisted value could not be decoded back into a domain type.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn domain(&self) -> Option<&CoreError> {
        match self {
            StoreError::Domain(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.domain(), Some(CoreError::NotFound { .. }))
    }

    pub(crate) fn poisoned(err: impl std::fmt::Display) -> Self {
        StoreError::Internal(format!("lock poisoned: {err}"))
    }
}
