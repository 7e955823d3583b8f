//! Native error → taxonomy mapping contract
//!
//! Each backend declares one static [`ErrorMappingTable`] keyed by its native
//! error codes. The dispatcher and staging layers only ever see the
//! resulting [`ProviderError`].

use super::result::{ErrorKind, ProviderError};

/// One native code and the taxonomy entry it maps to
#[derive(Debug, Clone, Copy)]
pub struct ErrorRule {
    pub native_code: &'static str,
    pub kind: ErrorKind,
    pub retryable: bool,
}

impl ErrorRule {
    pub const fn new(native_code: &'static str, kind: ErrorKind, retryable: bool) -> Self {
        Self {
            native_code,
            kind,
            retryable,
        }
    }
}

/// Per-backend mapping table
#[derive(Debug, Clone, Copy)]
pub struct ErrorMappingTable {
    backend: &'static str,
    rules: &'static [ErrorRule],
}

impl ErrorMappingTable {
    pub const fn new(backend: &'static str, rules: &'static [ErrorRule]) -> Self {
        Self { backend, rules }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn lookup(&self, native_code: &str) -> Option<&ErrorRule> {
        self.rules.iter().find(|r| r.native_code == native_code)
    }

    /// Map a native code. Unknown codes become non-retryable `Generic`
    /// errors carrying the native code.
    pub fn map(&self, native_code: &str, message: impl Into<String>) -> ProviderError {
        match self.lookup(native_code) {
            Some(rule) => ProviderError::new(rule.kind, message)
                .with_code(native_code)
                .with_retryable(rule.retryable),
            None => {
                tracing::debug!(
                    "{}: unmapped native error code {}",
                    self.backend,
                    native_code
                );
                ProviderError::generic(native_code, message)
            }
        }
    }

    /// Map a native code and attach the original error as cause
    pub fn map_error<E>(&self, native_code: &str, message: impl Into<String>, cause: E) -> ProviderError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.map(native_code, message).with_cause(cause)
    }
}

/// Mapping for `std::io::Error`, shared by every backend that touches the
/// local filesystem.
pub static IO_ERROR_TABLE: ErrorMappingTable = ErrorMappingTable::new(
    "io",
    &[
        ErrorRule::new("NotFound", ErrorKind::NotFound, false),
        ErrorRule::new("PermissionDenied", ErrorKind::PermissionDenied, false),
        ErrorRule::new("AlreadyExists", ErrorKind::AlreadyExists, false),
        ErrorRule::new("Unsupported", ErrorKind::Unimplemented, false),
        ErrorRule::new("ConnectionRefused", ErrorKind::ConnectionFailed, true),
        ErrorRule::new("ConnectionReset", ErrorKind::ConnectionFailed, true),
        ErrorRule::new("ConnectionAborted", ErrorKind::ConnectionFailed, true),
        ErrorRule::new("NotConnected", ErrorKind::ConnectionFailed, true),
        ErrorRule::new("BrokenPipe", ErrorKind::ConnectionFailed, true),
        ErrorRule::new("TimedOut", ErrorKind::ConnectionFailed, true),
        ErrorRule::new("Interrupted", ErrorKind::Generic, true),
        ErrorRule::new("WouldBlock", ErrorKind::Generic, true),
    ],
);

/// Map an I/O error through [`IO_ERROR_TABLE`], using `context` (usually the
/// path) as message prefix.
pub fn map_io_error(err: std::io::Error, context: &str) -> ProviderError {
    let code = format!("{:?}", err.kind());
    let message = format!("{}: {}", context, err);
    IO_ERROR_TABLE.map_error(&code, message, err)
}
