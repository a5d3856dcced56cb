//! Ingestion pipeline: chunkers for PDF/TXT/CSV plus the top-level flow that
//! derives a docid, replaces any prior version of the document, dispatches to
//! the right chunker, and hands the result to the collection store.

pub mod csv_chunker;
pub mod error;
pub mod pdf;
pub mod txt;

pub use csv_chunker::{CsvOptions, HeaderMode};
pub use error::IngestError;
pub use pdf::{LopdfExtractor, PdfPageExtractor};

use chrono::Utc;
use patchvec_model::{default_docid, CollectionId, MetaValue, TenantId};
use patchvec_store::{CollectionStore, IndexRecord};
use std::collections::BTreeMap;
use uuid::Uuid;

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn extension_of(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Dispatch to the right chunker by file extension (falling back to the
/// caller-supplied content type for CSV when the extension is absent).
fn chunk_bytes(
    filename: &str,
    bytes: &[u8],
    content_type: Option<&str>,
    csv_options: &CsvOptions,
) -> Result<Vec<IndexRecord>, IngestError> {
    match extension_of(filename).as_str() {
        "pdf" => pdf::chunk_pdf(bytes, &LopdfExtractor),
        "txt" => Ok(txt::chunk_txt(bytes, txt::DEFAULT_SIZE, txt::DEFAULT_OVERLAP)),
        "csv" => csv_chunker::chunk_csv(bytes, csv_options),
        other => {
            if content_type == Some("text/csv") {
                csv_chunker::chunk_csv(bytes, csv_options)
            } else {
                Err(IngestError::UnsupportedFileType(
                    if other.is_empty() { "unknown".to_string() } else { other.to_string() },
                ))
            }
        }
    }
}

/// Ingest one uploaded file: derive/accept a docid, replace any prior
/// version, chunk, merge metadata, and index.
///
/// Returns the number of chunks indexed.
#[allow(clippy::too_many_arguments)]
pub fn ingest_file(
    store: &CollectionStore,
    tenant: &TenantId,
    collection: &CollectionId,
    filename: &str,
    bytes: &[u8],
    docid: Option<&str>,
    client_meta: BTreeMap<String, MetaValue>,
    content_type: Option<&str>,
    csv_options: Option<CsvOptions>,
) -> Result<usize, IngestError> {
    let csv_options = csv_options.unwrap_or_default();
    let baseid = match docid {
        Some(d) if !d.is_empty() => d.to_string(),
        _ => default_docid(filename, &Uuid::new_v4().to_string()),
    };

    if store.has_doc(tenant, collection, &baseid)? {
        store.purge_doc(tenant, collection, &baseid)?;
    }

    let raw_records = chunk_bytes(filename, bytes, content_type, &csv_options)?;

    let ingested_at = now_iso();
    let mut base_meta = BTreeMap::new();
    base_meta.insert("docid".to_string(), MetaValue::String(baseid.clone()));
    base_meta.insert("filename".to_string(), MetaValue::String(filename.to_string()));
    base_meta.insert("ingested_at".to_string(), MetaValue::String(ingested_at));

    let records: Vec<IndexRecord> = raw_records
        .into_iter()
        .filter(|r| !r.text.is_empty())
        .map(|r| {
            let mut meta = base_meta.clone();
            meta.extend(client_meta.clone());
            meta.extend(r.meta);
            IndexRecord { local_id: r.local_id, text: r.text, meta }
        })
        .collect();

    if records.is_empty() {
        return Err(IngestError::NoTextExtracted);
    }

    Ok(store.index_records(tenant, collection, &baseid, records)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchvec_engine::{DeterministicEmbedder, EmbedderInfo};
    use std::sync::Arc;

    fn store(dir: &std::path::Path) -> CollectionStore {
        let embedder = DeterministicEmbedder::new(
            EmbedderInfo {
                embedding_model_id: "test".into(),
                dimension: 16,
                text_repr_version: "v1".into(),
            },
            1000,
        )
        .unwrap();
        CollectionStore::new(dir, Arc::new(embedder))
    }

    #[test]
    fn txt_ingest_produces_chunks_with_merged_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let tenant = TenantId::new("acme");
        let collection = CollectionId::new("docs");

        let n = ingest_file(
            &store,
            &tenant,
            &collection,
            "report.txt",
            b"hello world, this is a report",
            None,
            BTreeMap::new(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(n, 1);
        assert!(store.has_doc(&tenant, &collection, "REPORT_TXT").unwrap());
    }

    #[test]
    fn reingest_same_docid_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let tenant = TenantId::new("acme");
        let collection = CollectionId::new("docs");

        ingest_file(
            &store, &tenant, &collection, "a.txt", b"alpha", Some("DOC1"), BTreeMap::new(), None, None,
        )
        .unwrap();
        ingest_file(
            &store, &tenant, &collection, "a.txt", b"bravo", Some("DOC1"), BTreeMap::new(), None, None,
        )
        .unwrap();

        let matches = store
            .search(&tenant, &collection, "bravo", 5, &patchvec_model::RawFilters::new())
            .unwrap();
        assert!(matches.iter().any(|m| m.text.as_deref() == Some("bravo")));
        assert!(!matches.iter().any(|m| m.text.as_deref() == Some("alpha")));
    }

    #[test]
    fn empty_file_yields_no_text_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let tenant = TenantId::new("acme");
        let collection = CollectionId::new("docs");

        let err = ingest_file(
            &store, &tenant, &collection, "empty.txt", b"", None, BTreeMap::new(), None, None,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::NoTextExtracted));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let tenant = TenantId::new("acme");
        let collection = CollectionId::new("docs");

        let err = ingest_file(
            &store, &tenant, &collection, "file.xyz", b"data", None, BTreeMap::new(), None, None,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFileType(_)));
    }

    #[test]
    fn client_meta_overrides_base_but_not_per_chunk_extra() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let tenant = TenantId::new("acme");
        let collection = CollectionId::new("docs");

        let mut client_meta = BTreeMap::new();
        client_meta.insert("source".to_string(), MetaValue::String("upload".to_string()));
        ingest_file(
            &store, &tenant, &collection, "a.txt", b"hello", Some("D1"), client_meta, None, None,
        )
        .unwrap();

        let matches = store
            .search(&tenant, &collection, "hello", 5, &patchvec_model::RawFilters::new())
            .unwrap();
        let hit = matches.iter().find(|m| m.chunk_id == "D1::chunk_0").unwrap();
        assert_eq!(hit.meta.get("source"), Some(&MetaValue::String("upload".to_string())));
        assert_eq!(hit.meta.get("chunk"), Some(&MetaValue::Number(0.0)));
    }
}
