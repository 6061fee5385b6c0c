use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Failures that abort an analysis run. Everything else degrades the output
/// instead of failing it.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The layout detector returned no boxes for the page.
    #[error("no layout elements detected for the page")]
    NoLayoutDetected,

    /// A detector whose output is mandatory failed or timed out.
    #[error("{detector} detector failed: {reason}")]
    Detector {
        detector: &'static str,
        reason: String,
    },

    /// Another run with the same job id is still in flight.
    #[error("job {0} is already running")]
    JobInFlight(Uuid),

    #[error("failed to decode page image: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
