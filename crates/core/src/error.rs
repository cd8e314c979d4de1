use std::time::Duration;
use thiserror::Error;

/// User-facing message raised once overload retries are exhausted.
pub const OVERLOADED_MESSAGE: &str =
    "The AI service is temporarily overloaded. Please try again in a few minutes.";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf text extraction timed out ({}s)", .0.as_secs())]
    Timeout(Duration),

    #[error("pdf extraction worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{}", OVERLOADED_MESSAGE)]
    Overloaded { attempts: u32 },

    /// Raw overload signal from the service; only ever seen inside the retry loop.
    #[error("inference service overloaded (status {status}): {body}")]
    UpstreamOverloaded { status: u16, body: String },

    #[error("inference request failed with {status}: {body}")]
    Api { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid gateway configuration: {0}")]
    InvalidConfig(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl GatewayError {
    pub fn is_overload_signal(&self) -> bool {
        matches!(self, GatewayError::UpstreamOverloaded { .. })
    }
}

#[derive(Debug, Error)]
pub enum StructuredParseError {
    #[error("could not extract structured content from model response")]
    NoStructuredContent,

    #[error("structured content did not match the expected shape: {0}")]
    Shape(String),
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Parse(#[from] StructuredParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{what} timed out after {}s", .after.as_secs())]
    Timeout { what: &'static str, after: Duration },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("submission not found: {0}")]
    SubmissionNotFound(String),

    #[error("document content not found: {0}")]
    BlobNotFound(String),

    #[error("invalid store key: {0}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Submission not found")]
    SubmissionNotFound(String),

    #[error("submission lookup failed: {0}")]
    Lookup(StoreError),

    #[error("Failed to save report: {0}")]
    Persist(StoreError),

    #[error("status update failed: {0}")]
    Status(StoreError),

    #[error("analysis cancelled")]
    Cancelled,
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
