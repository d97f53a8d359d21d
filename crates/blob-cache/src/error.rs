//! Error types for the blob cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// Namespace is empty, too long, or contains characters outside `[A-Za-z0-9_-]`
    InvalidNamespace(String),
    /// A required caller-supplied field was absent or empty
    MissingField(&'static str),
    Database(Box<sqlx::Error>),
    Io(Box<std::io::Error>),
    /// The cache root or index could not be prepared; the cache is unusable
    Init(String),
}

impl CacheError {
    /// True for errors caused by the caller's input rather than by storage
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidNamespace(_) | CacheError::MissingField(_)
        )
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidNamespace(ns) => write!(f, "Invalid namespace: {:?}", ns),
            CacheError::MissingField(name) => write!(f, "Missing '{}'", name),
            CacheError::Database(err) => write!(f, "Index error: {}", err),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Init(msg) => write!(f, "Cache initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Database(err) => Some(err.as_ref()),
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Database(Box::new(err))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for CacheError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CacheError::Init(format!("index migration failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_namespace_display() {
        let err = CacheError::InvalidNamespace("../escape".to_string());
        assert_eq!(format!("{}", err), "Invalid namespace: \"../escape\"");
    }

    #[test]
    fn test_missing_field_display() {
        let err = CacheError::MissingField("key");
        assert_eq!(format!("{}", err), "Missing 'key'");
    }

    #[test]
    fn test_caller_error_classification() {
        assert!(CacheError::InvalidNamespace("a/b".into()).is_caller_error());
        assert!(CacheError::MissingField("value").is_caller_error());
        assert!(!CacheError::Init("permission denied".into()).is_caller_error());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(!CacheError::from(io).is_caller_error());
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CacheError::from(io);
        assert!(err.source().is_some());
        assert!(format!("{}", err).contains("denied"));
    }
}
