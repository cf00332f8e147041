use dompet_core::StorageError;
use thiserror::Error;

/// Failures surfaced by the ledger to its callers.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("store temporarily unavailable: {0}")]
    Transient(String),
    #[error("{0}")]
    Unexpected(String),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    pub fn not_found(entity: &str, id: i64) -> Self {
        LedgerError::NotFound(format!("{} {} not found", entity, id))
    }

    /// Stable machine-readable name, used in API error bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Transient(_) => "transient",
            LedgerError::Unexpected(_) => "unexpected",
        }
    }

    /// Whether re-running the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }
}

impl From<StorageError> for LedgerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => LedgerError::NotFound(e.to_string()),
            StorageError::Duplicate(m) | StorageError::StillReferenced(m) => LedgerError::Conflict(m),
            StorageError::ForeignKey(_) | StorageError::Overflow(_) => LedgerError::Conflict(e.to_string()),
            StorageError::Busy(_) | StorageError::ConnectionLost(_) => LedgerError::Transient(e.to_string()),
            StorageError::Corrupt(_) | StorageError::Other(_) => LedgerError::Unexpected(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_taxonomy() {
        let e: LedgerError = StorageError::not_found("account", 7).into();
        assert!(matches!(e, LedgerError::NotFound(ref m) if m == "account 7 not found"));

        let e: LedgerError = StorageError::StillReferenced("account still has transactions".into()).into();
        assert_eq!(e.kind(), "conflict");
        assert_eq!(e.to_string(), "account still has transactions");

        let e: LedgerError = StorageError::Busy("database is locked".into()).into();
        assert!(e.is_retryable());

        let e: LedgerError = StorageError::Overflow("balance".into()).into();
        assert_eq!(e.kind(), "conflict");
        assert!(!e.is_retryable());

        let e: LedgerError = StorageError::Corrupt("bad decimal".into()).into();
        assert_eq!(e.kind(), "unexpected");
        assert!(!e.is_retryable());
    }
}
