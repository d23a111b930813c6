//! Error types for Hangar.

use std::fmt;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stable numeric error codes, grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(u16);

impl ErrorCode {
    pub const INTERNAL: Self = Self(1000);

    pub const FILE_NOT_FOUND: Self = Self(3000);
    pub const FILE_READ_ERROR: Self = Self(3001);
    pub const FILE_WRITE_ERROR: Self = Self(3002);
    pub const FILE_LOCKED: Self = Self(3003);

    /// Category this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self.0 {
            3000..=3999 => ErrorCategory::FileSystem,
            _ => ErrorCategory::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Internal,
    FileSystem,
}

/// The main error type for Hangar operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Internal error with optional cause.
    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// File system error.
    #[error("{message}")]
    FileSystem {
        code: ErrorCode,
        message: String,
        path: Option<String>,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl Error {
    /// Create a new internal error.
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            source: None,
        }
    }

    /// Wrap an I/O error raised while touching `path`.
    pub fn io(
        code: ErrorCode,
        message: impl Into<String>,
        path: &std::path::Path,
        source: std::io::Error,
    ) -> Self {
        let code = if source.kind() == std::io::ErrorKind::NotFound {
            ErrorCode::FILE_NOT_FOUND
        } else {
            code
        };
        Self::FileSystem {
            code,
            message: message.into(),
            path: Some(path.to_string_lossy().to_string()),
            source: Some(Box::new(source)),
        }
    }

    /// Error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::INTERNAL,
            Self::FileSystem { code, .. } => *code,
        }
    }

    /// Error category.
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    /// Path involved, for file system errors.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::FileSystem { path, .. } => path.as_deref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let code = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::FILE_NOT_FOUND,
            std::io::ErrorKind::WouldBlock => ErrorCode::FILE_LOCKED,
            _ => ErrorCode::FILE_READ_ERROR,
        };
        Self::FileSystem {
            code,
            message: format!("I/O error: {}", e),
            path: None,
            source: Some(Box::new(e)),
        }
    }
}

/// Result type alias using Hangar's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_categories() {
        assert_eq!(ErrorCode::FILE_NOT_FOUND.category(), ErrorCategory::FileSystem);
        assert_eq!(ErrorCode::FILE_LOCKED.category(), ErrorCategory::FileSystem);
        assert_eq!(ErrorCode::INTERNAL.category(), ErrorCategory::Internal);
        assert_eq!(ErrorCode::FILE_WRITE_ERROR.to_string(), "E3002");
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.code(), ErrorCode::FILE_NOT_FOUND);

        let err: Error = std::io::Error::new(std::io::ErrorKind::WouldBlock, "busy").into();
        assert_eq!(err.code(), ErrorCode::FILE_LOCKED);
    }

    #[test]
    fn test_io_helper_keeps_path() {
        let path = std::path::Path::new("/tmp/registry.yaml");
        let err = Error::io(
            ErrorCode::FILE_WRITE_ERROR,
            "failed to write registry",
            path,
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.code(), ErrorCode::FILE_WRITE_ERROR);
        assert_eq!(err.path(), Some("/tmp/registry.yaml"));
        assert_eq!(err.to_string(), "failed to write registry");
    }
}
