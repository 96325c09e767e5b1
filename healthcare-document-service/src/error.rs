use thiserror::Error;

use crate::export::ExportError;
use crate::extract::ExtractionError;
use crate::llm::LlmError;

/// Top-level failure taxonomy for a single user interaction.
#[derive(Error, Debug)]
pub enum DocGenError {
    #[error("Text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Generative API failure: {0}")]
    Api(#[from] LlmError),

    #[error("Could not extract information from the document")]
    Unextractable,

    #[error("Please fill in all required fields: {}", .0.join(", "))]
    Validation(Vec<&'static str>),

    #[error("Document export failed: {0}")]
    Export(#[from] ExportError),
}

pub type Result<T> = std::result::Result<T, DocGenError>;
