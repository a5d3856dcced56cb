//! End-to-end coverage for scenarios that exercise more than one module of
//! the facade at once: metadata-filtered search (S4) and a search that
//! exceeds its configured deadline (S5).

use std::collections::BTreeMap;

use patchvec_model::{MetaValue, RawFilters};
use patchvec_service::{AuthContext, Config, PatchVecService};

fn admin() -> AuthContext {
    AuthContext { tenant: None, is_admin: true }
}

fn service(data_dir: &std::path::Path) -> PatchVecService {
    let mut cfg = Config::default();
    cfg.data_dir = data_dir.to_string_lossy().to_string();
    PatchVecService::new(cfg).unwrap()
}

#[test]
fn s4_filters_combine_prefilter_and_postfilter() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path());
    let ctx = admin();
    svc.create_collection(&ctx, "acme", "catalog").unwrap();

    let mut meta_a = BTreeMap::new();
    meta_a.insert("name".to_string(), MetaValue::String("foobar".to_string()));
    meta_a.insert("size".to_string(), MetaValue::Number(50.0));
    svc.ingest_document(&ctx, "acme", "catalog", "a.txt", b"widget alpha release notes", Some("A"), meta_a, None, None).unwrap();

    let mut meta_b = BTreeMap::new();
    meta_b.insert("name".to_string(), MetaValue::String("fooqux".to_string()));
    meta_b.insert("size".to_string(), MetaValue::Number(150.0));
    svc.ingest_document(&ctx, "acme", "catalog", "b.txt", b"widget beta release notes", Some("B"), meta_b, None, None).unwrap();

    let mut meta_c = BTreeMap::new();
    meta_c.insert("name".to_string(), MetaValue::String("bazbar".to_string()));
    meta_c.insert("size".to_string(), MetaValue::Number(250.0));
    svc.ingest_document(&ctx, "acme", "catalog", "c.txt", b"widget gamma release notes", Some("C"), meta_c, None, None).unwrap();

    // name matches "foo*" OR "*bar" (wildcard post-filter), AND size > 100
    // (comparator post-filter): only B and C pass the size bound, and only
    // B ("fooqux") and C ("bazbar") pass the name bound, so only B and C
    // should be present; A is excluded on both counts, and between B/C only
    // B matches the name wildcard while C matches on "*bar" too.
    let mut filters = RawFilters::new();
    filters.insert("name".to_string(), vec!["foo*".to_string(), "*bar".to_string()]);
    filters.insert("size".to_string(), vec![">100".to_string()]);

    let result = svc.search(&ctx, "acme", "catalog", "widget release", 10, &filters, None).unwrap();
    let hits: Vec<String> = result["matches"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["chunk_id"].as_str().unwrap().split("::").next().unwrap().to_string())
        .collect();

    assert!(hits.contains(&"B".to_string()));
    assert!(hits.contains(&"C".to_string()));
    assert!(!hits.contains(&"A".to_string()));
}

#[test]
fn s4_exact_filter_excludes_non_matching_docid() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path());
    let ctx = admin();
    svc.create_collection(&ctx, "acme", "docs").unwrap();
    svc.ingest_document(&ctx, "acme", "docs", "one.txt", b"quarterly report numbers", Some("Q1"), BTreeMap::new(), None, None).unwrap();
    svc.ingest_document(&ctx, "acme", "docs", "two.txt", b"quarterly report numbers", Some("Q2"), BTreeMap::new(), None, None).unwrap();

    let mut filters = RawFilters::new();
    filters.insert("docid".to_string(), vec!["Q1".to_string()]);
    let result = svc.search(&ctx, "acme", "docs", "quarterly", 10, &filters, None).unwrap();
    let hits = result["matches"].as_array().unwrap();
    assert!(hits.iter().all(|m| m["chunk_id"].as_str().unwrap().starts_with("Q1::")));
}

#[test]
fn s5_search_timeout_surfaces_search_timeout_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.data_dir = dir.path().to_string_lossy().to_string();
    // A zero-millisecond budget can't be met: the worker thread must be
    // spawned and scheduled before it can answer, so `recv_timeout` always
    // observes the deadline first.
    cfg.search.timeout_ms = 0;
    let svc = PatchVecService::new(cfg).unwrap();
    let ctx = admin();
    svc.create_collection(&ctx, "acme", "slow").unwrap();
    svc.ingest_document(&ctx, "acme", "slow", "doc.txt", b"some searchable content here", Some("D"), BTreeMap::new(), None, None).unwrap();

    let err = svc.search(&ctx, "acme", "slow", "searchable", 5, &RawFilters::new(), None).unwrap_err();
    assert_eq!(err.code, "search_timeout");
}

#[test]
fn non_admin_cannot_search_another_tenants_collection() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path());
    svc.create_collection(&admin(), "acme", "private").unwrap();
    svc.ingest_document(&admin(), "acme", "private", "doc.txt", b"secret content", Some("S"), BTreeMap::new(), None, None).unwrap();

    let intruder = AuthContext { tenant: Some("other".to_string()), is_admin: false };
    let err = svc.search(&intruder, "acme", "private", "secret", 5, &RawFilters::new(), None).unwrap_err();
    assert_eq!(err.code, "auth_forbidden");
}
