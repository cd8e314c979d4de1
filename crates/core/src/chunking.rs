use crate::error::StageError;
use crate::extractor::{extract_pages_with_timeout, has_usable_text, PageText, PdfExtractor};
use crate::gateway::{InferenceGateway, InferenceRequest, MessageContent};
use crate::models::ModelTier;
use crate::prompts;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Documents whose base64 encoding fits under this are sent natively.
    pub native_threshold_bytes: usize,
    pub pages_per_chunk: usize,
    pub min_text_chars: usize,
    pub extraction_timeout: Duration,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            native_threshold_bytes: 5 * 1024 * 1024,
            pages_per_chunk: 12,
            min_text_chars: crate::extractor::MIN_TEXT_LAYER_CHARS,
            extraction_timeout: crate::extractor::DEFAULT_EXTRACTION_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPlan {
    /// Send the whole document as a native attachment in one call.
    Native,
    Chunked(Vec<String>),
}

/// Joins page text into groups of `pages_per_chunk` pages.
pub fn group_pages(pages: &[PageText], pages_per_chunk: usize) -> Vec<String> {
    pages
        .chunks(pages_per_chunk.max(1))
        .map(|group| {
            group
                .iter()
                .map(|page| page.text.trim())
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .collect()
}

/// Documents without a usable text layer never enter the chunked path.
pub fn plan_chunks(pages: &[PageText], config: &ChunkingConfig) -> ChunkPlan {
    if !has_usable_text(pages, config.min_text_chars) {
        return ChunkPlan::Native;
    }
    ChunkPlan::Chunked(group_pages(pages, config.pages_per_chunk))
}

#[derive(Debug, Clone)]
pub struct DocumentPrompt {
    pub system: String,
    pub user: String,
    pub model: ModelTier,
    pub max_tokens: u32,
}

pub struct DocumentAnalyzer {
    extractor: Arc<dyn PdfExtractor>,
    config: ChunkingConfig,
}

impl DocumentAnalyzer {
    pub fn new(extractor: Arc<dyn PdfExtractor>, config: ChunkingConfig) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Runs `prompt` against the document, chunking oversized inputs.
    /// `on_chunk(done, total)` fires once per finished chunk call.
    pub async fn analyze(
        &self,
        gateway: &dyn InferenceGateway,
        prompt: &DocumentPrompt,
        pdf: Arc<[u8]>,
        on_chunk: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<String, StageError> {
        let encoded = STANDARD.encode(&pdf);
        if encoded.len() <= self.config.native_threshold_bytes {
            return self.send_native(gateway, prompt, encoded).await;
        }

        let pages = extract_pages_with_timeout(
            Arc::clone(&self.extractor),
            Arc::clone(&pdf),
            self.config.extraction_timeout,
        )
        .await?;

        match plan_chunks(&pages, &self.config) {
            ChunkPlan::Native => {
                info!(pages = pages.len(), "no usable text layer, sending document natively");
                self.send_native(gateway, prompt, encoded).await
            }
            ChunkPlan::Chunked(chunks) => self.send_chunked(gateway, prompt, chunks, on_chunk).await,
        }
    }

    async fn send_native(
        &self,
        gateway: &dyn InferenceGateway,
        prompt: &DocumentPrompt,
        pdf_base64: String,
    ) -> Result<String, StageError> {
        let request = InferenceRequest {
            system: prompt.system.clone(),
            content: MessageContent::Document {
                pdf_base64,
                text: prompt.user.clone(),
            },
            model: prompt.model,
            max_tokens: prompt.max_tokens,
        };
        Ok(gateway.complete(&request).await?)
    }

    async fn send_chunked(
        &self,
        gateway: &dyn InferenceGateway,
        prompt: &DocumentPrompt,
        chunks: Vec<String>,
        on_chunk: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<String, StageError> {
        let total = chunks.len();
        info!(chunks = total, "splitting document text into parallel calls");

        let calls = chunks.iter().enumerate().map(|(index, chunk)| async move {
            let request = InferenceRequest::text(
                prompt.system.clone(),
                prompts::chunk_user(&prompt.user, index + 1, total, chunk),
                prompt.model,
            )
            .with_max_tokens(prompt.max_tokens);

            let result = gateway.complete(&request).await;
            debug!(part = index + 1, total, ok = result.is_ok(), "chunk call finished");
            on_chunk(index + 1, total);
            result
        });

        let mut partials = join_all(calls)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        if partials.len() == 1 {
            return Ok(partials.remove(0));
        }

        let merge = InferenceRequest::text(
            prompt.system.clone(),
            prompts::merge_user(&partials),
            prompt.model,
        )
        .with_max_tokens(prompt.max_tokens);

        Ok(gateway.complete(&merge).await?)
    }
}
