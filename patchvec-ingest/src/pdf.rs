//! PDF chunker: one chunk per page via `lopdf`'s text extraction. Pages that
//! yield no text produce empty-text chunks, dropped by the caller the way
//! any other zero-text chunk is dropped.

use crate::error::IngestError;
use lopdf::Document;
use patchvec_model::MetaValue;
use patchvec_store::IndexRecord;
use std::collections::BTreeMap;

/// Extracts per-page text from a PDF. Exists as a trait so the extraction
/// backend can be swapped without touching the chunking logic above it.
pub trait PdfPageExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<(u32, String)>, IngestError>;
}

/// The pure-Rust `lopdf` backend: loads the document, walks pages in
/// document order, extracts text page by page.
pub struct LopdfExtractor;

impl PdfPageExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<(u32, String)>, IngestError> {
        let doc = Document::load_mem(bytes).map_err(|e| IngestError::PdfParse(e.to_string()))?;
        let mut pages: Vec<(u32, _)> = doc.get_pages().into_iter().collect();
        pages.sort_by_key(|(n, _)| *n);

        let mut out = Vec::with_capacity(pages.len());
        for (page_num, _id) in pages {
            let text = doc
                .extract_text(&[page_num])
                .unwrap_or_default();
            out.push((page_num, text));
        }
        Ok(out)
    }
}

pub fn chunk_pdf(bytes: &[u8], extractor: &dyn PdfPageExtractor) -> Result<Vec<IndexRecord>, IngestError> {
    let pages = extractor.extract_pages(bytes)?;
    let mut records = Vec::with_capacity(pages.len());
    for (page_num, text) in pages {
        let mut meta = BTreeMap::new();
        meta.insert("page".to_string(), MetaValue::Number(page_num as f64));
        records.push(IndexRecord {
            local_id: format!("page_{page_num}"),
            text,
            meta,
        });
    }
    Ok(records)
}
