//! Error types for podcheck

use thiserror::Error;

/// Result type alias using the podcheck Error
pub type Result<T> = std::result::Result<T, Error>;

/// podcheck error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid test definition: {0}")]
    InvalidDefinition(String),

    #[error("'{rule}' cannot capture from a {kind} test")]
    InvalidCaptureSource { rule: &'static str, kind: &'static str },

    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid jsonpath '{path}': {reason}")]
    InvalidJsonPath { path: String, reason: String },

    #[error("expectation failed: {0}")]
    Expectation(String),

    #[error("jsonpath '{0}' matched nothing")]
    NoResults(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("kubectl: {0}")]
    Kubectl(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("timed out after {seconds}s waiting for {what}")]
    WaitTimeout { seconds: u64, what: String },

    #[error("retries exhausted after {attempts} attempts waiting for {what}")]
    RetriesExhausted { attempts: u32, what: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Configuration errors are terminal for a test and are never retried,
    /// unlike expectation and transport failures.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidDefinition(_)
                | Error::InvalidCaptureSource { .. }
                | Error::InvalidRegex { .. }
                | Error::InvalidJsonPath { .. }
        )
    }
}
