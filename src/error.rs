use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result of a single dispatcher call: a (possibly empty) JSON body or a
/// classified failure.
pub type RequestOutcome = Result<Option<Value>, RequestError>;

/// Uniform failure shape for every request sent to the analytics service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// API key or base URL missing. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// Connection refused, timeout, DNS, TLS and friends.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Non-2xx response. `details` holds the server's explanation.
    #[error("{message}")]
    Http {
        status_code: u16,
        message: String,
        details: ErrorDetails,
    },

    /// 2xx response whose body could not be decoded.
    #[error("decode error: {message}")]
    Decode {
        message: String,
        raw_response: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    UnsupportedMethod,
    Transport,
    Http,
    Decode,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::UnsupportedMethod => "UnsupportedMethod",
            ErrorKind::Transport => "TransportError",
            ErrorKind::Http => "HttpError",
            ErrorKind::Decode => "DecodeError",
        };
        f.write_str(name)
    }
}

/// Body of an error response: parsed JSON when possible, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetails {
    Structured(Value),
    Text(String),
}

impl ErrorDetails {
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str(body) {
            Ok(value) => ErrorDetails::Structured(value),
            Err(_) => ErrorDetails::Text(body.to_string()),
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetails::Structured(value) => write!(f, "{}", value),
            ErrorDetails::Text(text) => f.write_str(text),
        }
    }
}

impl RequestError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport { message: msg.into() }
    }

    pub fn decode(msg: impl Into<String>, raw_response: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
            raw_response: raw_response.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Configuration(_) => ErrorKind::Configuration,
            RequestError::UnsupportedMethod(_) => ErrorKind::UnsupportedMethod,
            RequestError::Transport { .. } => ErrorKind::Transport,
            RequestError::Http { .. } => ErrorKind::Http,
            RequestError::Decode { .. } => ErrorKind::Decode,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestError::Http { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub fn details(&self) -> Option<&ErrorDetails> {
        match self {
            RequestError::Http { details, .. } => Some(details),
            _ => None,
        }
    }
}
