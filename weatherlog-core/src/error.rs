use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by a weather source while fetching observations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Network failure, timeout or a provider-side outage.
    #[error("weather source unavailable: {0}")]
    Unavailable(String),

    /// The provider rejected the configured credential.
    #[error("weather source rejected the API key: {0}")]
    Auth(String),

    /// The provider answered, but not with the payload it documents.
    #[error("malformed response from weather source: {0}")]
    MalformedResponse(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Unavailable(_) => "SourceUnavailable",
            SourceError::Auth(_) => "AuthError",
            SourceError::MalformedResponse(_) => "MalformedResponse",
        }
    }

    /// An auth failure needs operator action; everything else may clear up by the next tick.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::Auth(_))
    }
}

/// Failures of the on-disk record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },

    #[error("failed to read {}: {reason}", path.display())]
    Read {
        path: PathBuf,
        reason: String,
        missing: bool,
    },
}

impl StoreError {
    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::Read {
            path: path.into(),
            reason: reason.to_string(),
            missing: false,
        }
    }

    pub(crate) fn missing(path: impl Into<PathBuf>) -> Self {
        StoreError::Read {
            path: path.into(),
            reason: "file does not exist".to_string(),
            missing: true,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Write { .. } => "StoreWriteError",
            StoreError::Read { .. } => "StoreReadError",
        }
    }

    /// True when the store file simply has not been created yet.
    pub fn is_missing(&self) -> bool {
        matches!(self, StoreError::Read { missing: true, .. })
    }
}

/// Anything that can fail a single collection cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Source(e) => e.kind(),
            CycleError::Store(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_kinds_use_taxonomy_names() {
        assert_eq!(SourceError::Unavailable("x".into()).kind(), "SourceUnavailable");
        assert_eq!(SourceError::Auth("x".into()).kind(), "AuthError");
        assert_eq!(SourceError::MalformedResponse("x".into()).kind(), "MalformedResponse");
    }

    #[test]
    fn only_auth_errors_are_not_retryable() {
        assert!(SourceError::Unavailable("timeout".into()).is_retryable());
        assert!(SourceError::MalformedResponse("bad".into()).is_retryable());
        assert!(!SourceError::Auth("401".into()).is_retryable());
    }

    #[test]
    fn missing_file_is_distinguished_from_corruption() {
        assert!(StoreError::missing("data.csv").is_missing());
        assert!(!StoreError::read("data.csv", "bad row").is_missing());
        assert_eq!(StoreError::write("data.csv", "disk full").kind(), "StoreWriteError");
    }

    #[test]
    fn cycle_error_forwards_kind_and_message() {
        let err = CycleError::from(SourceError::Auth("Invalid API key".into()));
        assert_eq!(err.kind(), "AuthError");
        assert!(err.to_string().contains("Invalid API key"));
    }
}
