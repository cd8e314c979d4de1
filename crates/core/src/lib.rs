pub mod cancel;
pub mod catalog;
pub mod chunking;
pub mod config;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod quality;
pub mod stages;
pub mod stores;
pub mod structured;
pub mod traits;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use catalog::{compute_weighted_score, fallback_scores, SCREENING_CRITERIA};
pub use chunking::{ChunkingConfig, DocumentAnalyzer};
pub use config::{PipelineConfig, StageTokenBudgets};
pub use error::{
    ExtractError, GatewayError, PipelineError, StageError, StoreError, StructuredParseError,
    OVERLOADED_MESSAGE,
};
pub use extractor::{extract_pages_with_timeout, LopdfExtractor, PageText, PdfExtractor};
pub use gateway::{AnthropicGateway, GatewayConfig, InferenceGateway, InferenceRequest, RetryPolicy};
pub use models::{
    AnalysisReport, AnalysisRequest, CriterionScore, Document, DocumentKind, Flag, MarketResearch,
    ModelTier, Submission, SubmissionStatus,
};
pub use orchestrator::AnalysisPipeline;
pub use progress::{decode_sse_frames, encode_sse_frame, ProgressEvent, ProgressPublisher, RunOutcome};
pub use stores::{FsStore, MemoryStore};
pub use structured::{parse_structured, ParseStrategy};
pub use traits::SubmissionStore;
