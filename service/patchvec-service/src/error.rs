use std::fmt;

/// Typed error at the service boundary: every handler either returns `Ok`
/// with an operation-specific payload, or one of these, which the transport
/// adapter maps to an HTTP status via [`status_code_for`].
#[derive(Debug, Clone)]
pub struct ServiceError {
    pub code: &'static str,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceError {}

/// Map a store error to its service code. `CollectionNotFound`/
/// `CollectionConflict`/`RenameInvalid` always carry their own fixed code;
/// anything else (I/O, engine, serde) falls back to `fallback`, which the
/// caller sets to the code for the operation it was attempting (e.g.
/// `delete_collection_failed`) rather than a single catch-all.
pub fn store_error(e: patchvec_store::StoreError, fallback: &'static str) -> ServiceError {
    use patchvec_store::StoreError::*;
    let code = match &e {
        CollectionNotFound { .. } => "collection_not_found",
        CollectionConflict { .. } => "collection_conflict",
        RenameInvalid(_) => "rename_invalid",
        _ => fallback,
    };
    ServiceError::new(code, e.to_string())
}

impl From<patchvec_ingest::IngestError> for ServiceError {
    fn from(e: patchvec_ingest::IngestError) -> Self {
        use patchvec_ingest::IngestError::*;
        match &e {
            NoTextExtracted => ServiceError::new("no_text_extracted", e.to_string()),
            InvalidCsvOptions(_) => ServiceError::new("invalid_csv_options", e.to_string()),
            UnsupportedFileType(_) => ServiceError::new("invalid_csv_options", e.to_string()),
            PdfParse(_) => ServiceError::new("ingest_failed", e.to_string()),
            Store(_) => ServiceError::new("ingest_failed", e.to_string()),
        }
    }
}

/// Fixed code → HTTP status table, per the taxonomy in the specification's
/// error handling design.
pub fn status_code_for(code: &str) -> u16 {
    match code {
        "auth_invalid" => 401,
        "auth_forbidden" | "admin_required" => 403,
        "tenant_rate_limited" => 429,
        "search_overloaded" | "search_timeout" | "ingest_overloaded" => 503,
        "file_too_large" => 413,
        "invalid_metadata_json" | "invalid_csv_options" | "archive_invalid" | "rename_invalid"
        | "no_text_extracted" => 400,
        "collection_not_found" => 404,
        "collection_conflict" => 409,
        _ => 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_covers_taxonomy() {
        assert_eq!(status_code_for("tenant_rate_limited"), 429);
        assert_eq!(status_code_for("search_timeout"), 503);
        assert_eq!(status_code_for("collection_conflict"), 409);
        assert_eq!(status_code_for("ingest_failed"), 500);
        assert_eq!(status_code_for("something_unknown"), 500);
    }
}
