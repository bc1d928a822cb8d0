use std::path::PathBuf;

use thiserror::Error;

/// Failures of the individual pipeline stages.
///
/// Every variant aborts the run. The pipeline attaches the page number and
/// stage as context before handing the error to the caller.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("no <script> containing {marker:?} found in page")]
    ScriptNotFound { marker: &'static str },

    #[error("sandbox execution failed: {0}")]
    SandboxExecution(String),

    #[error("sandbox state is not serializable to JSON: {0}")]
    Serialization(String),

    #[error("unexpected state shape: missing top-level key {key:?}")]
    UnexpectedStateShape { key: &'static str },

    #[error("robots.txt disallows {0}")]
    RobotsDisallowed(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScrapeError {
    pub(crate) fn network(url: impl ToString, reason: impl ToString) -> Self {
        ScrapeError::Network {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn output(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScrapeError::Output {
            path: path.into(),
            source,
        }
    }
}
