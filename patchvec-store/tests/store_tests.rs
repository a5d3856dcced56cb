use std::collections::BTreeMap;
use std::sync::Arc;

use patchvec_engine::{DeterministicEmbedder, EmbedderInfo};
use patchvec_model::{CollectionId, RawFilters, TenantId};
use patchvec_store::{CollectionStore, IndexRecord};

fn store(dir: &std::path::Path) -> CollectionStore {
    let embedder = DeterministicEmbedder::new(
        EmbedderInfo {
            embedding_model_id: "test".into(),
            dimension: 32,
            text_repr_version: "v1".into(),
        },
        10_000,
    )
    .unwrap();
    CollectionStore::new(dir, Arc::new(embedder))
}

fn record(local_id: &str, text: &str) -> IndexRecord {
    IndexRecord {
        local_id: local_id.to_string(),
        text: text.to_string(),
        meta: BTreeMap::new(),
    }
}

#[test]
fn basic_ingest_and_search() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let tenant = TenantId::new("acme");
    let collection = CollectionId::new("invoices");

    let n = store
        .index_records(
            &tenant,
            &collection,
            "verne",
            vec![record("chunk_0", "Captain Nemo submarine voyage")],
        )
        .unwrap();
    assert_eq!(n, 1);

    let matches = store
        .search(&tenant, &collection, "submarine", 2, &RawFilters::new())
        .unwrap();
    assert!(!matches.is_empty());
    assert!(matches[0].chunk_id.starts_with("verne::"));
    assert!(matches[0].match_reason.contains("semantic similarity"));
}

#[test]
fn reingest_same_docid_replaces_old_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let tenant = TenantId::new("acme");
    let collection = CollectionId::new("reup");

    store
        .index_records(&tenant, &collection, "R-42", vec![record("chunk_0", "alpha bravo charlie")])
        .unwrap();
    store.purge_doc(&tenant, &collection, "R-42").unwrap();
    store
        .index_records(&tenant, &collection, "R-42", vec![record("chunk_0", "delta echo foxtrot")])
        .unwrap();

    assert!(store.has_doc(&tenant, &collection, "R-42").unwrap());

    let mut filters = RawFilters::new();
    filters.insert("docid".to_string(), vec!["R-42".to_string()]);
    let matches = store.search(&tenant, &collection, "delta", 5, &filters).unwrap();
    assert!(matches.iter().any(|m| m.text.as_deref().unwrap_or("").contains("delta")));
    assert!(!matches.iter().any(|m| m.text.as_deref().unwrap_or("").contains("alpha")));
}

#[test]
fn purge_doc_removes_all_traces() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let tenant = TenantId::new("acme");
    let collection = CollectionId::new("c1");

    store
        .index_records(&tenant, &collection, "docA", vec![record("chunk_0", "hello world")])
        .unwrap();
    let removed = store.purge_doc(&tenant, &collection, "docA").unwrap();
    assert_eq!(removed, 1);
    assert!(!store.has_doc(&tenant, &collection, "docA").unwrap());

    let matches = store.search(&tenant, &collection, "hello", 5, &RawFilters::new()).unwrap();
    assert!(!matches.iter().any(|m| m.chunk_id.starts_with("docA::")));
}

#[test]
fn sidecar_round_trip_preserves_crlf() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let tenant = TenantId::new("acme");
    let collection = CollectionId::new("c1");
    let text = "line one\r\nline two\r\n";

    store
        .index_records(&tenant, &collection, "docB", vec![record("chunk_0", text)])
        .unwrap();
    let matches = store.search(&tenant, &collection, "line", 5, &RawFilters::new()).unwrap();
    let hit = matches.iter().find(|m| m.chunk_id == "docB::chunk_0").unwrap();
    assert_eq!(hit.text.as_deref(), Some(text));
}

#[test]
fn rename_collision_rules() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let tenant = TenantId::new("acme");
    let foo = CollectionId::new("foo");
    let bar = CollectionId::new("bar");

    store.load_or_init(&tenant, &foo).unwrap();
    store.load_or_init(&tenant, &bar).unwrap();
    store.save(&tenant, &foo).unwrap();
    store.save(&tenant, &bar).unwrap();

    assert!(store.rename_collection(&tenant, &bar, &foo).is_err());
    store.delete_collection(&tenant, &foo).unwrap();
    assert!(store.rename_collection(&tenant, &bar, &foo).is_ok());
}

#[test]
fn empty_index_directory_does_not_crash_load_or_init() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let tenant = TenantId::new("t");
    let collection = CollectionId::new("c");
    store.load_or_init(&tenant, &collection).unwrap();
    assert_eq!(store.list_collections(&tenant), Vec::<String>::new());
}

#[test]
fn wildcard_and_comparator_filter_split_s4() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let tenant = TenantId::new("acme");
    let collection = CollectionId::new("c1");

    let rows = [("foobar", 50.0), ("fooqux", 150.0), ("bazbar", 250.0), ("zulu", 5.0)];
    for (name, size) in rows {
        let mut meta = BTreeMap::new();
        meta.insert("name".to_string(), patchvec_model::MetaValue::String(name.to_string()));
        meta.insert("size".to_string(), patchvec_model::MetaValue::Number(size));
        store
            .index_records(
                &tenant,
                &collection,
                name,
                vec![IndexRecord {
                    local_id: "chunk_0".to_string(),
                    text: "foo content".to_string(),
                    meta,
                }],
            )
            .unwrap();
    }

    let mut filters = RawFilters::new();
    filters.insert("name".to_string(), vec!["foo*".to_string(), "*bar".to_string()]);
    filters.insert("size".to_string(), vec![">100".to_string()]);
    let matches = store.search(&tenant, &collection, "foo", 10, &filters).unwrap();
    let mut ids: Vec<String> = matches.iter().map(|m| m.chunk_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["bazbar::chunk_0".to_string(), "fooqux::chunk_0".to_string()]);
}
