//! Error types for the proxy.
//!
//! [`ProxyError`] carries the internal detail used for logging. Anything that
//! reaches a client goes through [`ErrorKind`], which only ever exposes a fixed
//! message and an approximate status code.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Upstream unreachable: {message}")]
    UpstreamUnreachable { message: String },

    #[error("Upstream timed out: {message}")]
    UpstreamTimeout { message: String },

    #[error("Upstream rejected request with status {status}: {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("Malformed upstream payload: {message}")]
    UpstreamMalformed { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::UpstreamUnreachable {
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::UpstreamTimeout {
            message: msg.into(),
        }
    }

    pub fn rejected(status: u16, msg: impl Into<String>) -> Self {
        Self::UpstreamRejected {
            status,
            message: msg.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::UpstreamMalformed {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    /// Classify a transport failure from reqwest.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_decode() {
            Self::malformed(err.to_string())
        } else {
            Self::unreachable(err.to_string())
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } | Self::Toml(_) => ErrorKind::ConfigMissing,
            Self::UpstreamUnreachable { .. } | Self::Io(_) => ErrorKind::UpstreamUnreachable,
            Self::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            Self::UpstreamRejected { status, .. } => ErrorKind::UpstreamRejected { status: *status },
            Self::UpstreamMalformed { .. } | Self::Json(_) => ErrorKind::UpstreamMalformed,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::ClientDisconnected => ErrorKind::ClientDisconnected,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_transport(&err)
    }
}

/// Client-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigMissing,
    UpstreamUnreachable,
    UpstreamTimeout,
    UpstreamRejected { status: u16 },
    UpstreamMalformed,
    InvalidRequest,
    ClientDisconnected,
}

impl ErrorKind {
    /// Approximate HTTP status returned to the client.
    ///
    /// Upstream auth failures become 502: the client did nothing wrong, the
    /// proxy's own credential did.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::ConfigMissing => 500,
            Self::UpstreamUnreachable | Self::UpstreamMalformed => 502,
            Self::UpstreamTimeout => 504,
            Self::UpstreamRejected { status } => match status {
                429 => 429,
                401 | 403 => 502,
                400..=499 => 400,
                _ => 502,
            },
            Self::InvalidRequest => 400,
            Self::ClientDisconnected => 499,
        }
    }

    /// Fixed text for the `error` field. Never derived from upstream payloads.
    #[must_use]
    pub fn client_message(self) -> &'static str {
        match self {
            Self::ConfigMissing => "proxy is not configured",
            Self::UpstreamUnreachable => "inference backend is unreachable",
            Self::UpstreamTimeout => "inference backend timed out",
            Self::UpstreamRejected { status } => match status {
                429 => "inference backend rate limit exceeded",
                401 | 403 => "inference backend refused the proxy credentials",
                400..=499 => "inference backend rejected the request",
                _ => "inference backend returned an error",
            },
            Self::UpstreamMalformed => "inference backend returned an unreadable response",
            Self::InvalidRequest => "invalid request body",
            Self::ClientDisconnected => "client disconnected",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_status_mapping() {
        assert_eq!(ErrorKind::UpstreamRejected { status: 429 }.status_code(), 429);
        assert_eq!(ErrorKind::UpstreamRejected { status: 401 }.status_code(), 502);
        assert_eq!(ErrorKind::UpstreamRejected { status: 422 }.status_code(), 400);
        assert_eq!(ErrorKind::UpstreamRejected { status: 503 }.status_code(), 502);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ProxyError::config("UPSTREAM_API_KEY not set").kind(),
            ErrorKind::ConfigMissing
        );
        assert_eq!(
            ProxyError::rejected(500, "boom").kind(),
            ErrorKind::UpstreamRejected { status: 500 }
        );
        assert_eq!(ProxyError::timeout("slow").kind(), ErrorKind::UpstreamTimeout);
    }

    #[test]
    fn test_client_message_hides_detail() {
        let err = ProxyError::unreachable("connect to https://api.example.com failed: sk-secret");
        let msg = err.kind().client_message();
        assert!(!msg.contains("sk-secret"));
        assert!(!msg.contains("api.example.com"));
    }
}
