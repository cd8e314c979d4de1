use crate::error::ExtractError;
use lopdf::Document;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Below this many characters of aggregate text a document is treated as
/// image-only (scanned) and has no usable text layer.
pub const MIN_TEXT_LAYER_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    /// Ordered per-page text. Pages without a text layer yield empty text
    /// rather than an error.
    fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, ExtractError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let document =
            Document::load_mem(pdf).map_err(|error| ExtractError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text.split_whitespace().collect::<Vec<_>>().join(" "),
                Err(error) => {
                    debug!(page = page_no, %error, "page has no extractable text");
                    String::new()
                }
            };

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

/// Runs the extractor on the blocking pool and gives up after `timeout`.
/// A timed-out parse keeps running on its worker thread, but the caller is
/// released.
pub async fn extract_pages_with_timeout(
    extractor: Arc<dyn PdfExtractor>,
    pdf: Arc<[u8]>,
    timeout: Duration,
) -> Result<Vec<PageText>, ExtractError> {
    let task = tokio::task::spawn_blocking(move || extractor.extract_pages(&pdf));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ExtractError::Worker(join_error.to_string())),
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "pdf text extraction timed out");
            Err(ExtractError::Timeout(timeout))
        }
    }
}

pub fn aggregate_text_len(pages: &[PageText]) -> usize {
    pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<String>()
        .trim()
        .chars()
        .count()
}

pub fn has_usable_text(pages: &[PageText], min_chars: usize) -> bool {
    aggregate_text_len(pages) >= min_chars
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowExtractor;

    impl PdfExtractor for SlowExtractor {
        fn extract_pages(&self, _pdf: &[u8]) -> Result<Vec<PageText>, ExtractError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }
    }

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
        }
    }

    #[test]
    fn malformed_bytes_are_a_parse_error() {
        let result = LopdfExtractor.extract_pages(b"definitely not a pdf");
        assert!(matches!(result, Err(ExtractError::PdfParse(_))));
    }

    #[test]
    fn short_text_layer_is_not_usable() {
        let pages = vec![page(1, "   "), page(2, "Logo"), page(3, "")];
        assert!(!has_usable_text(&pages, MIN_TEXT_LAYER_CHARS));

        let long = "x".repeat(MIN_TEXT_LAYER_CHARS);
        let pages = vec![page(1, &long)];
        assert!(has_usable_text(&pages, MIN_TEXT_LAYER_CHARS));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_extraction_fails_with_timeout() {
        let result = extract_pages_with_timeout(
            Arc::new(SlowExtractor),
            Arc::from(Vec::new()),
            Duration::from_millis(20),
        )
        .await;

        assert!(matches!(result, Err(ExtractError::Timeout(_))));
    }
}
