//! Typed operation outcome shared by every provider
//!
//! Expected failure modes (missing file, permission, connectivity) are
//! returned as [`ProviderError`] values, never raised.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend-agnostic error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    ConnectionFailed,
    AlreadyExists,
    Unimplemented,
    /// Batch operation stopped by the caller
    Cancelled,
    Generic,
}

impl ErrorKind {
    /// Default error code for this kind
    pub fn default_code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::ConnectionFailed => "CONNECTION_FAILED",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::Unimplemented => "UNIMPLEMENTED",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Generic => "GENERIC_ERROR",
        }
    }

    /// Kinds the resilience wrapper never retries, whatever the backend says
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound
                | ErrorKind::PermissionDenied
                | ErrorKind::AlreadyExists
                | ErrorKind::Unimplemented
                | ErrorKind::Cancelled
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "Not found",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::ConnectionFailed => "Connection failed",
            ErrorKind::AlreadyExists => "Already exists",
            ErrorKind::Unimplemented => "Unimplemented",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Generic => "Error",
        };
        f.write_str(s)
    }
}

/// Provider operation error
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    kind: ErrorKind,
    code: String,
    message: String,
    retryable: bool,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

/// Outcome of every provider operation
pub type OperationResult<T> = Result<T, ProviderError>;

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code().to_string(),
            message: message.into(),
            retryable: false,
            cause: None,
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, path)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, message)
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, path)
    }

    /// Operation not representable by the provider's capability set
    pub fn unimplemented(operation: &str) -> Self {
        Self::new(
            ErrorKind::Unimplemented,
            format!("{} is not supported by this provider", operation),
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn generic(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, message).with_code(code)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Advisory flag for the resilience wrapper
    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_unimplemented(&self) -> bool {
        self.kind == ErrorKind::Unimplemented
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl Serialize for ProviderError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ProviderError", 4)?;
        state.serialize_field("kind", &self.kind)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("retryable", &self.retryable)?;
        state.end()
    }
}

/// Narrowing predicates on [`OperationResult`]
pub trait OperationResultExt {
    fn is_success(&self) -> bool;
    fn is_error(&self) -> bool;
    fn is_unimplemented(&self) -> bool;
    fn error_kind(&self) -> Option<ErrorKind>;
}

impl<T> OperationResultExt for OperationResult<T> {
    fn is_success(&self) -> bool {
        self.is_ok()
    }

    fn is_error(&self) -> bool {
        self.is_err()
    }

    fn is_unimplemented(&self) -> bool {
        matches!(self, Err(e) if e.is_unimplemented())
    }

    fn error_kind(&self) -> Option<ErrorKind> {
        self.as_ref().err().map(|e| e.kind())
    }
}
