//! Error types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Connection, authentication or command failure on one host
    #[error("Remote execution error on {host}: {message}")]
    RemoteExecution { host: String, message: String },

    /// Unexpected command output; callers degrade to raw passthrough
    #[error("Parse error: {0}")]
    Parse(String),

    /// Malformed input rejected before any dispatch begins
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Build a remote execution error for `host`
    pub fn remote(host: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RemoteExecution {
            host: host.into(),
            message: message.into(),
        }
    }
}

// Convert anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_names_host() {
        let err = Error::remote("web-1", "connection refused");
        assert_eq!(
            err.to_string(),
            "Remote execution error on web-1: connection refused"
        );
    }

    #[test]
    fn test_from_anyhow() {
        let err: Error = anyhow::anyhow!("boom").into();
        assert!(matches!(err, Error::Other(ref m) if m == "boom"));
    }
}
