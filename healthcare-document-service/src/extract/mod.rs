//! Raw text extraction from uploaded documents.
//!
//! The declared file type picks the extractor; content is never sniffed.

pub mod ocr;
pub mod pdf;

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub use ocr::{OcrEngine, VisionOcr, build_ocr_engine};
pub use pdf::extract_from_pdf;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Error extracting text from PDF: {0}")]
    Pdf(String),

    #[error("Error reading image: {0}")]
    Image(String),

    #[error("Error extracting text from image: {0}")]
    Ocr(String),

    #[error("Unsupported file type '{0}'. Upload a PDF, PNG or JPEG document")]
    UnsupportedFormat(String),

    #[error("No text could be extracted from the document")]
    NoText,

    #[error("Extraction worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    /// Resolve the kind from the declared content type, falling back to the
    /// file extension when the client sent none.
    pub fn from_declared(
        content_type: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<Self, ExtractionError> {
        let content_type = content_type
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");

        if let Some(content_type) = content_type {
            return match content_type.as_str() {
                "application/pdf" => Ok(FileKind::Pdf),
                ct if ct.starts_with("image/") => Ok(FileKind::Image),
                other => Err(ExtractionError::UnsupportedFormat(other.to_string())),
            };
        }

        let extension = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(FileKind::Pdf),
            "png" | "jpg" | "jpeg" => Ok(FileKind::Image),
            _ => Err(ExtractionError::UnsupportedFormat(
                file_name.unwrap_or("unknown").to_string(),
            )),
        }
    }
}

/// Dispatches uploads to the PDF text layer reader or the OCR engine.
#[derive(Clone)]
pub struct TextExtractor {
    ocr: Arc<dyn OcrEngine>,
}

impl TextExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    pub async fn extract(&self, kind: FileKind, bytes: Vec<u8>) -> Result<String, ExtractionError> {
        info!(kind = ?kind, bytes = bytes.len(), "Extracting document text");

        let text = match kind {
            FileKind::Pdf => tokio::task::spawn_blocking(move || extract_from_pdf(&bytes)).await??,
            FileKind::Image => self.ocr.recognize(&bytes).await?,
        };

        if text.trim().is_empty() {
            warn!(kind = ?kind, "Document produced no text");
            return Err(ExtractionError::NoText);
        }

        info!(chars = text.chars().count(), "Document text extracted");
        Ok(text)
    }
}
