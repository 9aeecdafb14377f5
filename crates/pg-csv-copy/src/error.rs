//! Error types for the bulk load/unload pipeline.

use thiserror::Error;

/// Main error type for copy operations.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Configuration error (bad mapping, missing file, invalid option, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A mapped source header was not found in the delimited file.
    #[error("Header '{0}' not found in the source file")]
    HeaderNotFound(String),

    /// A mapping key names a column that does not exist on the target schema.
    #[error("Table does not include a '{0}' column")]
    FieldDoesNotExist(String),

    /// The declared text encoding could not decode the source bytes.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A requested feature is not supported by the connected server version.
    #[error("Not supported by this server: {0}")]
    Unsupported(String),

    /// Constraint/index suspension was requested inside an open transaction.
    #[error("Transaction management error: {0}")]
    TransactionManagement(String),

    /// Database error reported by the engine (propagated, not recovered).
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// IO error (file operations, destination writes).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CopyError {
    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        CopyError::Config(message.into())
    }

    /// Create an Encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        CopyError::Encoding(message.into())
    }
}

/// Result type alias for copy operations.
pub type Result<T> = std::result::Result<T, CopyError>;
