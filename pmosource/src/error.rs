//! Error types shared by the registry, the providers and the stream opener

use std::fmt;

/// Result type alias for source operations
pub type Result<T> = std::result::Result<T, SourceError>;

/// Whether a transport failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Timeouts, connection resets, 5xx, 429
    Transient,
    /// 404, 410 and other definitive answers
    Permanent,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Transient => f.write_str("transient"),
            TransportKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Flat classification of a [`SourceError`], as seen by the playback engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ParseError,
    TransportError(TransportKind),
    AccessDenied,
    StreamUnavailable,
    CorruptData,
    Cancelled,
    UnknownProvider,
    Config,
}

/// Errors that can occur while resolving, opening or decoding tracks
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// No registered provider claimed the query
    #[error("No source provider matched query: {0}")]
    NotFound(String),

    /// The remote answer did not have the expected shape
    #[error("Malformed response from {provider}: {message}")]
    Parse { provider: String, message: String },

    /// Network level failure
    #[error("{kind} transport error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        kind: TransportKind,
        status: Option<u16>,
        message: String,
    },

    /// Authentication, age gate, region lock or exclusive content
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The stream opener gave up
    #[error("Stream unavailable after {attempts} attempt(s): {reason}")]
    StreamUnavailable { attempts: u32, reason: String },

    /// Persisted track bytes could not be decoded
    #[error("Corrupt track data: {0}")]
    CorruptData(String),

    /// The provider that claimed a query failed to resolve it
    #[error("Provider {provider} failed to resolve the query: {cause}")]
    ResolutionFailed {
        provider: String,
        #[source]
        cause: Box<SourceError>,
    },

    /// Cancelled through a cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// A track references a provider that is not registered
    #[error("Unknown source provider: {0}")]
    UnknownProvider(String),

    /// Configuration error (from pmoconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl SourceError {
    /// Create a parse error for the given provider
    pub fn parse(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a transient transport error without HTTP status
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transport {
            kind: TransportKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    /// Create a permanent transport error without HTTP status
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Transport {
            kind: TransportKind::Permanent,
            status: None,
            message: message.into(),
        }
    }

    /// Create an error from an unexpected HTTP status code
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            401 | 403 => Self::AccessDenied(message),
            408 | 425 | 429 | 500..=599 => Self::Transport {
                kind: TransportKind::Transient,
                status: Some(code),
                message,
            },
            _ => Self::Transport {
                kind: TransportKind::Permanent,
                status: Some(code),
                message,
            },
        }
    }

    /// Flat kind of the error, looking through `ResolutionFailed`
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::NotFound(_) => ErrorKind::NotFound,
            SourceError::Parse { .. } => ErrorKind::ParseError,
            SourceError::Transport { kind, .. } => ErrorKind::TransportError(*kind),
            SourceError::AccessDenied(_) => ErrorKind::AccessDenied,
            SourceError::StreamUnavailable { .. } => ErrorKind::StreamUnavailable,
            SourceError::CorruptData(_) => ErrorKind::CorruptData,
            SourceError::ResolutionFailed { cause, .. } => cause.kind(),
            SourceError::Cancelled => ErrorKind::Cancelled,
            SourceError::UnknownProvider(_) => ErrorKind::UnknownProvider,
            SourceError::Config(_) => ErrorKind::Config,
        }
    }

    /// True for transport errors that may succeed on retry
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransportError(TransportKind::Transient)
    }

    /// True for access-gate failures (401/403, age gates)
    pub fn is_access_denied(&self) -> bool {
        self.kind() == ErrorKind::AccessDenied
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::Transport { status, .. } => *status,
            SourceError::ResolutionFailed { cause, .. } => cause.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }

        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            return Self::transient(err.to_string());
        }

        // reqwest reports both a bad JSON payload and a body cut short as decode errors
        if err.is_decode() {
            if has_json_source(&err) {
                return Self::parse("http", err.to_string());
            }
            return Self::transient(err.to_string());
        }

        if err.is_builder() {
            return Self::permanent(err.to_string());
        }

        Self::transient(err.to_string())
    }
}

fn has_json_source(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.is::<serde_json::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse("json", err.to_string())
    }
}

impl From<url::ParseError> for SourceError {
    fn from(err: url::ParseError) -> Self {
        Self::permanent(format!("Invalid URL: {}", err))
    }
}
