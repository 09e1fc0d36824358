use thiserror::Error;

/// Failure taxonomy shared by both backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Missing or malformed required field on a write. Never queued.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Embedded SQL transaction or serialization failure. The write was queued.
    #[error("engine fault: {0}")]
    EngineFault(#[from] EngineFault),
    /// Binary import did not look like a database.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// Legacy extraction failed; the import was aborted.
    #[error("legacy migration failed: {0}")]
    Migration(String),
    #[error("unsupported snapshot version {found}, expected {expected}")]
    UnsupportedVersion { found: u64, expected: u64 },
    /// The key-value substrate itself could not be read or written.
    #[error("substrate error: {0}")]
    Substrate(String),
}

/// Error from the transactional write path of the SQL backend.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EngineFault(pub String);

impl From<rusqlite::Error> for EngineFault {
    fn from(e: rusqlite::Error) -> Self {
        EngineFault(format!("sqlite error: {e}"))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Substrate(e.to_string())
    }
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    /// Stable short code used on the IPC surface.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Validation(_) => "validation_failed",
            StoreError::EngineFault(_) => "engine_fault",
            StoreError::InvalidFormat(_) => "invalid_format",
            StoreError::Migration(_) => "migration_failed",
            StoreError::UnsupportedVersion { .. } => "unsupported_version",
            StoreError::Substrate(_) => "substrate_failed",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
