use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::request::Request;
use crate::response::Response;

/// Result type for rmhttp operations
pub type Result<T> = std::result::Result<T, Error>;

/// Library error type
///
/// These are failures raised synchronously while building requests or
/// configuring a dispatcher, plus the errors a [`Transport`](crate::transport::Transport)
/// reports. Outcomes of a dispatched request are delivered as [`ErrorInfo`].
#[derive(Error, Debug)]
pub enum Error {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A duplicate key was found where unique keys are required
    #[error("Duplicate parameter key: {0}")]
    DuplicateKeys(String),

    /// Timeout errors
    #[error("Request timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Multipart form data errors
    #[error("Multipart error: {0}")]
    Multipart(String),

    /// Invalid request configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with custom message
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Create a new timeout error
    pub fn timeout(duration: std::time::Duration) -> Self {
        Error::Timeout { duration }
    }

    /// Create a new multipart error
    pub fn multipart(message: impl Into<String>) -> Self {
        Error::Multipart(message.into())
    }

    /// Create a new invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest(message.into())
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Create a new custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Network(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Check if this is a network error
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Error::InvalidRequest(format!("Invalid header name: {}", err))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Error::InvalidRequest(format!("Invalid header value: {}", err))
    }
}

/// Category of a failed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The body was present but could not be decoded into the expected shape
    Parsing,
    /// The transport failed (DNS, TLS, timeout, connection reset, ...)
    Transport,
    /// The exchange completed but its status code is in a failure set
    StatusCode,
    /// Anything the classifier does not recognize
    None,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parsing => "parsing",
            ErrorKind::Transport => "transport",
            ErrorKind::StatusCode => "status-code",
            ErrorKind::None => "none",
        };
        f.write_str(name)
    }
}

/// Error delivered to a completion callback
///
/// Exactly one `ErrorInfo` is produced per failed request. The request and
/// response references exist for diagnostics only.
#[derive(Clone)]
pub struct ErrorInfo {
    kind: ErrorKind,
    status_code: u16,
    reason: String,
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    request: Option<Arc<Request>>,
    response: Option<Arc<Response>>,
}

impl ErrorInfo {
    /// Create an error of the given kind with a reason
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: 0,
            reason: reason.into(),
            cause: None,
            request: None,
            response: None,
        }
    }

    /// Create a parsing error
    pub fn parsing(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, reason)
    }

    /// Create a transport error from the transport's failure
    ///
    /// The reason is the cause's display text, unchanged.
    pub fn transport(cause: Error) -> Self {
        let mut info = Self::new(ErrorKind::Transport, cause.to_string());
        info.cause = Some(Arc::new(cause));
        info
    }

    /// Create a status-code error for `status`
    pub fn status_code(status: u16) -> Self {
        let reason = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected status");
        Self::new(ErrorKind::StatusCode, reason.to_lowercase()).with_status(status)
    }

    /// Attach the numeric status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = status;
        self
    }

    /// Attach the underlying cause
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Attach the originating request
    pub fn with_request(mut self, request: Arc<Request>) -> Self {
        self.request = Some(request);
        self
    }

    /// Attach the response, picking up its status code if none is set yet
    pub fn with_response(mut self, response: Arc<Response>) -> Self {
        if self.status_code == 0 {
            self.status_code = response.status();
        }
        self.response = Some(response);
        self
    }

    /// Error category
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status code, or 0 when not applicable
    pub fn status(&self) -> u16 {
        self.status_code
    }

    /// Human-readable reason
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Underlying cause, if any
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Request that produced this error
    pub fn request(&self) -> Option<&Request> {
        self.request.as_deref()
    }

    /// Response that produced this error
    pub fn response(&self) -> Option<&Response> {
        self.response.as_deref()
    }

    pub fn is_parsing(&self) -> bool {
        self.kind == ErrorKind::Parsing
    }

    pub fn is_transport(&self) -> bool {
        self.kind == ErrorKind::Transport
    }

    pub fn is_status_code(&self) -> bool {
        self.kind == ErrorKind::StatusCode
    }
}

impl fmt::Debug for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorInfo")
            .field("kind", &self.kind)
            .field("status_code", &self.status_code)
            .field("reason", &self.reason)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .field("request", &self.request.as_ref().map(|r| r.url().as_str()))
            .finish()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error", self.kind)?;
        if self.status_code != 0 {
            write!(f, " ({})", self.status_code)?;
        }
        write!(f, ": {}", self.reason)?;
        if let Some(request) = &self.request {
            write!(f, " : {}", request)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}
