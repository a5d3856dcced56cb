use thiserror::Error;

/// Errors surfaced by the ingestion pipeline. Variant names line up with the
/// client/server error codes the service layer maps to HTTP status.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no text could be extracted from the uploaded file")]
    NoTextExtracted,

    #[error("invalid csv options: {0}")]
    InvalidCsvOptions(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("pdf parsing failed: {0}")]
    PdfParse(String),

    #[error(transparent)]
    Store(#[from] patchvec_store::StoreError),
}
