use std::fmt;
use thiserror::Error;

/// A single problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors returned by a [`CounterStore`](crate::store::CounterStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store refused to take the call (circuit open, shutting down, ...)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Request timed out
    #[error("Store request timed out: {0}")]
    TimedOut(String),

    /// Transport level failure
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Store answered but did not apply the increment
    #[error("Store rejected increment: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Key cannot be addressed by this store
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    /// Check if this error is transient and a later flush could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_)
                | StoreError::TimedOut(_)
                | StoreError::NetworkError(_)
                | StoreError::Rejected {
                    status: 408 | 429 | 502 | 503 | 504,
                    ..
                }
        )
    }
}

/// Unified error type for tag-tally.
#[derive(Error, Debug, Clone)]
pub enum TallyError {
    /// Invalid argument passed to a constructor
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Validation error with every issue found
    #[error("Validation error: {}", .0.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
    ValidationError(Vec<ValidationIssue>),

    #[error("I/O error: {0}")]
    IoError(String),

    /// Parse/serialization error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Flush request queue is at capacity
    #[error("Flush queue is full")]
    FlushQueueFull,

    /// Flush worker has shut down
    #[error("Flush worker stopped")]
    WorkerStopped,
}

// === Conversion Implementations ===

macro_rules! impl_from_error {
    ($target:ty, $err_type:ty, $arm:pat => $body:expr) => {
        impl From<$err_type> for $target {
            fn from(err: $err_type) -> Self {
                match err {
                    $arm => $body,
                }
            }
        }
    };
}

impl_from_error!(TallyError, std::io::Error, e => match e.kind() {
    std::io::ErrorKind::InvalidInput => TallyError::InvalidConfig(e.to_string()),
    _ => TallyError::IoError(e.to_string()),
});

impl_from_error!(TallyError, serde_json::Error, e => TallyError::ParseError(e.to_string()));
impl_from_error!(TallyError, toml::de::Error, e => TallyError::ParseError(e.to_string()));

impl_from_error!(StoreError, reqwest::Error, e => if e.is_timeout() {
    StoreError::TimedOut(e.to_string())
} else if e.is_connect() {
    StoreError::NetworkError(format!("Store disconnected: {}", e))
} else if let Some(status) = e.status() {
    StoreError::Rejected { status: status.as_u16(), message: e.to_string() }
} else {
    StoreError::NetworkError(e.to_string())
});

/// Result type alias for operations that can fail with TallyError.
pub type TallyResult<T> = Result<T, TallyError>;

/// Result type alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;
