//! Text extraction from uploaded documents

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),

    #[error("document is not valid UTF-8: {0}")]
    InvalidEncoding(String),

    #[error("extraction failed: {0}")]
    Failed(String),
}

/// Text recovered from a document
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    /// Extraction confidence in [0, 1]
    pub confidence: f64,
}

/// Turns raw document bytes into text (OCR, PDF parsing, ...)
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], content_type: &str)
        -> Result<ExtractedText, ExtractionError>;
}

/// Extractor for documents that already are text
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

const SUPPORTED: &[&str] = &["text/plain", "text/markdown"];

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ExtractedText, ExtractionError> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !SUPPORTED.contains(&mime.as_str()) {
            return Err(ExtractionError::UnsupportedContentType(content_type.to_string()));
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|e| ExtractionError::InvalidEncoding(e.to_string()))?;
        Ok(ExtractedText {
            text: text.trim_start_matches('\u{feff}').to_string(),
            confidence: 1.0,
        })
    }
}
