//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Log file does not exist
    #[error("Jitlog not found: {path}")]
    NotFound {
        /// Path given on the command line
        path: String,
    },

    /// Forest ingestion error
    #[error("Jitlog error: {0}")]
    Forest(#[from] jitlog::ForestError),

    /// Writing the listing failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Create a not-found error
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = CliError::not_found("/tmp/missing.jit");
        assert_eq!(err.to_string(), "Jitlog not found: /tmp/missing.jit");
    }

    #[test]
    fn test_forest_error_from() {
        let err: CliError = jitlog::ForestError::NotAJitlog.into();
        assert!(err.to_string().starts_with("Jitlog error: Not a jitlog"));
    }

    #[test]
    fn test_io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: CliError = io.into();
        assert!(matches!(err, CliError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: pipe closed");
    }
}
