use std::fmt;

/// Errors of the repository tools
#[derive(Debug)]
pub enum RepoToolsError {
    /// Local document store errors
    Database(String),
    /// GitHub answered with a non-success status
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },
    /// Payload from GitHub lacks a field or has the wrong shape
    GitHub(String),
    /// Bad configuration, unresolvable repository or unreachable remote
    Config(String),
    Io(std::io::Error),
    Json(serde_json::Error),
    /// Transport level failure talking to GitHub
    Http(reqwest::Error),
    Time(chrono::ParseError),
    Csv(csv::Error),
}

impl RepoToolsError {
    /// Errors raised before any work starts; the binaries map these to exit code 1.
    pub fn is_setup(&self) -> bool {
        matches!(self, RepoToolsError::Config(_))
    }

    /// Turn any failure met while establishing a connection into a setup error
    pub fn into_setup(self, what: &str) -> Self {
        match self {
            RepoToolsError::Config(_) => self,
            other => RepoToolsError::Config(format!("{}: {}", what, other)),
        }
    }
}

impl fmt::Display for RepoToolsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoToolsError::Database(msg) => write!(f, "store: {}", msg),
            RepoToolsError::Status {
                endpoint,
                status,
                message,
            } => write!(f, "{} returned HTTP {}: {}", endpoint, status, message),
            RepoToolsError::GitHub(msg) => write!(f, "unexpected GitHub payload: {}", msg),
            RepoToolsError::Config(msg) => f.write_str(msg),
            RepoToolsError::Io(err) => write!(f, "I/O: {}", err),
            RepoToolsError::Json(err) => write!(f, "JSON: {}", err),
            RepoToolsError::Http(err) => write!(f, "request failed: {}", err),
            RepoToolsError::Time(err) => write!(f, "bad timestamp: {}", err),
            RepoToolsError::Csv(err) => write!(f, "CSV: {}", err),
        }
    }
}

impl std::error::Error for RepoToolsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepoToolsError::Io(err) => Some(err),
            RepoToolsError::Json(err) => Some(err),
            RepoToolsError::Http(err) => Some(err),
            RepoToolsError::Time(err) => Some(err),
            RepoToolsError::Csv(err) => Some(err),
            RepoToolsError::Database(_)
            | RepoToolsError::Status { .. }
            | RepoToolsError::GitHub(_)
            | RepoToolsError::Config(_) => None,
        }
    }
}

impl From<std::io::Error> for RepoToolsError {
    fn from(err: std::io::Error) -> Self {
        RepoToolsError::Io(err)
    }
}

impl From<serde_json::Error> for RepoToolsError {
    fn from(err: serde_json::Error) -> Self {
        RepoToolsError::Json(err)
    }
}

impl From<reqwest::Error> for RepoToolsError {
    fn from(err: reqwest::Error) -> Self {
        RepoToolsError::Http(err)
    }
}

impl From<chrono::ParseError> for RepoToolsError {
    fn from(err: chrono::ParseError) -> Self {
        RepoToolsError::Time(err)
    }
}

impl From<csv::Error> for RepoToolsError {
    fn from(err: csv::Error) -> Self {
        RepoToolsError::Csv(err)
    }
}

impl From<sqlx::Error> for RepoToolsError {
    fn from(err: sqlx::Error) -> Self {
        RepoToolsError::Database(err.to_string())
    }
}

// Token and repository patterns are part of setup, so their failures are too
impl From<reqwest::header::InvalidHeaderValue> for RepoToolsError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        RepoToolsError::Config(format!("invalid GitHub token: {}", err))
    }
}

impl From<regex::Error> for RepoToolsError {
    fn from(err: regex::Error) -> Self {
        RepoToolsError::Config(err.to_string())
    }
}

impl From<url::ParseError> for RepoToolsError {
    fn from(err: url::ParseError) -> Self {
        RepoToolsError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RepoToolsError>;
