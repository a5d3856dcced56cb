//! Service API layer: the facade the CLI (and, were it built, an HTTP
//! transport) drives. Each public method corresponds to one wire operation
//! in the specification's external-interfaces section; none of them know
//! about HTTP framing, which stays out of scope.

pub mod admission;
pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ops_log;

pub use auth::AuthContext;
pub use config::Config;
pub use error::ServiceError;

use admission::Admission;
use metrics::Metrics;
use ops_log::{OpEvent, OpsLog};
use patchvec_engine::DeterministicEmbedder;
use patchvec_ingest::CsvOptions;
use patchvec_model::{CollectionId, MetaValue, RawFilters, TenantId};
use patchvec_store::CollectionStore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

const EMBEDDING_DIMENSION: usize = 256;
const EMBEDDING_MAX_INPUT_LENGTH: usize = 50_000;

pub struct PatchVecService {
    config: Config,
    store: Arc<CollectionStore>,
    metrics: Arc<Metrics>,
    ops_log: Arc<OpsLog>,
    admission: Admission,
}

impl PatchVecService {
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let data_dir = config.data_dir_path();
        std::fs::create_dir_all(&data_dir).map_err(|e| ServiceError::new("data_dir_not_found", e.to_string()))?;

        let embedder = DeterministicEmbedder::new(
            patchvec_engine::EmbedderInfo {
                embedding_model_id: "patchvec-deterministic-v1".to_string(),
                dimension: EMBEDDING_DIMENSION,
                text_repr_version: "v1".to_string(),
            },
            EMBEDDING_MAX_INPUT_LENGTH,
        )
        .map_err(|e| ServiceError::new("ingest_failed", e.to_string()))?;

        let store = Arc::new(CollectionStore::new(data_dir.clone(), Arc::new(embedder)));
        let metrics = Arc::new(Metrics::new(Some(data_dir)));
        let ops_log = Arc::new(
            OpsLog::configure(config.log.ops_log.as_deref())
                .map_err(|e| ServiceError::new("data_dir_not_found", e.to_string()))?,
        );
        let admission = Admission::new(
            config.search.max_concurrent,
            config.ingest.max_concurrent,
            config.tenants.default_max_concurrent,
            config.tenants.per_tenant.iter().map(|(k, v)| (k.clone(), v.max_concurrent)).collect(),
        );

        Ok(Self { config, store, metrics, ops_log, admission })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn tenant_collection(tenant: &str, collection: &str) -> (TenantId, CollectionId) {
        (TenantId::new(tenant), CollectionId::new(collection))
    }

    // -- collections --------------------------------------------------

    pub fn create_collection(&self, ctx: &AuthContext, tenant: &str, collection: &str) -> Result<serde_json::Value, ServiceError> {
        auth::authorize_tenant(ctx, tenant)?;
        self.metrics.inc("requests_total", 1.0);
        let (t, c) = Self::tenant_collection(tenant, collection);
        let result = (|| -> Result<(), ServiceError> {
            self.store.load_or_init(&t, &c).map_err(|e| error::store_error(e, "create_collection_failed"))?;
            self.store.save(&t, &c).map_err(|e| error::store_error(e, "create_collection_failed"))?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.metrics.inc("collections_created_total", 1.0);
                Ok(serde_json::json!({ "ok": true, "tenant": tenant, "collection": collection }))
            }
            Err(e) => {
                self.metrics.set_error(e.to_string());
                Err(e)
            }
        }
    }

    pub fn delete_collection(&self, ctx: &AuthContext, tenant: &str, collection: &str) -> Result<serde_json::Value, ServiceError> {
        auth::authorize_tenant(ctx, tenant)?;
        self.metrics.inc("requests_total", 1.0);
        let (t, c) = Self::tenant_collection(tenant, collection);
        match self.store.delete_collection(&t, &c) {
            Ok(()) => {
                self.metrics.inc("collections_deleted_total", 1.0);
                Ok(serde_json::json!({ "ok": true, "tenant": tenant, "deleted": collection }))
            }
            Err(e) => {
                let se = error::store_error(e, "delete_collection_failed");
                self.metrics.set_error(se.to_string());
                Err(se)
            }
        }
    }

    pub fn rename_collection(&self, ctx: &AuthContext, tenant: &str, old_name: &str, new_name: &str) -> Result<serde_json::Value, ServiceError> {
        auth::authorize_tenant(ctx, tenant)?;
        self.metrics.inc("requests_total", 1.0);
        if old_name == new_name {
            return Err(ServiceError::new("rename_invalid", "old and new names are the same"));
        }
        let t = TenantId::new(tenant);
        let old = CollectionId::new(old_name);
        let new = CollectionId::new(new_name);
        match self.store.rename_collection(&t, &old, &new) {
            Ok(()) => {
                self.metrics.inc("collections_renamed_total", 1.0);
                Ok(serde_json::json!({ "ok": true, "tenant": tenant, "old_name": old_name, "new_name": new_name }))
            }
            Err(e) => {
                let se = error::store_error(e, "rename_collection_failed");
                self.metrics.set_error(se.to_string());
                Err(se)
            }
        }
    }

    pub fn list_collections(&self, ctx: &AuthContext, tenant: &str) -> Result<serde_json::Value, ServiceError> {
        auth::authorize_tenant(ctx, tenant)?;
        self.metrics.inc("requests_total", 1.0);
        let t = TenantId::new(tenant);
        let mut collections = self.store.list_collections(&t);
        collections.sort();
        Ok(serde_json::json!({ "ok": true, "tenant": tenant, "count": collections.len(), "collections": collections }))
    }

    pub fn list_tenants(&self, ctx: &AuthContext) -> Result<serde_json::Value, ServiceError> {
        auth::require_admin(ctx)?;
        self.metrics.inc("requests_total", 1.0);
        let mut tenants = self.store.list_tenants();
        tenants.sort();
        Ok(serde_json::json!({ "ok": true, "count": tenants.len(), "tenants": tenants }))
    }

    // -- documents ------------------------------------------------------

    pub fn delete_document(&self, ctx: &AuthContext, tenant: &str, collection: &str, docid: &str) -> Result<serde_json::Value, ServiceError> {
        auth::authorize_tenant(ctx, tenant)?;
        self.metrics.inc("requests_total", 1.0);
        let (t, c) = Self::tenant_collection(tenant, collection);
        let purged = match self.store.has_doc(&t, &c, docid) {
            Ok(true) => self.store.purge_doc(&t, &c, docid).map_err(|e| error::store_error(e, "delete_document_failed"))?,
            Ok(false) => 0,
            Err(e) => return Err(error::store_error(e, "delete_document_failed")),
        };
        if purged > 0 {
            self.metrics.inc("purge_total", purged as f64);
            self.metrics.inc("documents_deleted_total", 1.0);
        }
        Ok(serde_json::json!({
            "ok": true, "tenant": tenant, "collection": collection, "docid": docid, "chunks_deleted": purged
        }))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ingest_document(
        &self,
        ctx: &AuthContext,
        tenant: &str,
        collection: &str,
        filename: &str,
        bytes: &[u8],
        docid: Option<&str>,
        metadata: BTreeMap<String, MetaValue>,
        content_type: Option<&str>,
        csv_options: Option<CsvOptions>,
    ) -> Result<serde_json::Value, ServiceError> {
        auth::authorize_tenant(ctx, tenant)?;
        self.metrics.inc("requests_total", 1.0);
        let max_bytes = self.config.ingest.max_file_size_mb * 1024 * 1024;
        if max_bytes != 0 && bytes.len() as u64 > max_bytes {
            return Err(ServiceError::new("file_too_large", format!("{} bytes exceeds limit of {max_bytes}", bytes.len())));
        }

        let permit = self.admission.try_admit_ingest(tenant, ctx.is_admin)?;
        let start = Instant::now();
        let (t, c) = Self::tenant_collection(tenant, collection);

        let result = patchvec_ingest::ingest_file(&self.store, &t, &c, filename, bytes, docid, metadata, content_type, csv_options);
        drop(permit);
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_latency("ingest", latency_ms);

        match result {
            Ok(chunks) => {
                self.metrics.inc("documents_indexed_total", 1.0);
                self.metrics.inc("chunks_indexed_total", chunks as f64);
                self.ops_log.emit(OpEvent {
                    op: "ingest",
                    tenant: Some(tenant.to_string()),
                    collection: Some(collection.to_string()),
                    latency_ms,
                    status: "ok",
                    extras: vec![("chunks", serde_json::json!(chunks))],
                    ..Default::default()
                });
                Ok(serde_json::json!({
                    "ok": true, "tenant": tenant, "collection": collection, "chunks": chunks
                }))
            }
            Err(e) => {
                let se: ServiceError = e.into();
                self.metrics.set_error(se.to_string());
                self.ops_log.emit(OpEvent {
                    op: "ingest",
                    tenant: Some(tenant.to_string()),
                    collection: Some(collection.to_string()),
                    latency_ms,
                    status: "error",
                    error_code: Some(se.code.to_string()),
                    ..Default::default()
                });
                Err(se)
            }
        }
    }

    // -- search -----------------------------------------------------------

    /// Run one `CollectionStore::search` on a worker thread and wait at most
    /// `timeout_ms`, returning `search_timeout` if it does not answer in
    /// time. The worker thread is left to finish on its own; its eventual
    /// result (if any) is discarded.
    fn search_one(
        &self,
        tenant: &str,
        collection: &str,
        q: &str,
        k: usize,
        filters: &RawFilters,
    ) -> Result<Vec<patchvec_model::Match>, ServiceError> {
        let store = Arc::clone(&self.store);
        let (t, c) = Self::tenant_collection(tenant, collection);
        let q_owned = q.to_string();
        let filters_owned = filters.clone();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = store.search(&t, &c, &q_owned, k, &filters_owned);
            let _ = tx.send(result);
        });

        let timeout = Duration::from_millis(self.config.search.timeout_ms);
        match rx.recv_timeout(timeout) {
            Ok(Ok(matches)) => Ok(matches),
            Ok(Err(e)) => Err(error::store_error(e, "search_failed")),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(ServiceError::new("search_timeout", format!("search exceeded {}ms", self.config.search.timeout_ms)))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ServiceError::new("search_failed", "search worker terminated without a result"))
            }
        }
    }

    /// Whether `tenant`/`collection` should also be searched against the
    /// shared common collection, per `common_enabled`/`common_tenant`/
    /// `common_collection`.
    fn common_fanout_target(&self, tenant: &str) -> Option<(&str, &str)> {
        if !self.config.common_enabled {
            return None;
        }
        let common_tenant = self.config.common_tenant.as_deref()?;
        let common_collection = self.config.common_collection.as_deref()?;
        if tenant == common_tenant {
            return None;
        }
        Some((common_tenant, common_collection))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn search(
        &self,
        ctx: &AuthContext,
        tenant: &str,
        collection: &str,
        q: &str,
        k: usize,
        filters: &RawFilters,
        request_id: Option<&str>,
    ) -> Result<serde_json::Value, ServiceError> {
        auth::authorize_tenant(ctx, tenant)?;
        self.metrics.inc("requests_total", 1.0);
        self.metrics.inc("search_total", 1.0);

        let permit = self.admission.try_admit_search(tenant, ctx.is_admin)?;
        let start = Instant::now();

        let primary = self.search_one(tenant, collection, q, k, filters);
        // The common collection shares the request's admission permit and
        // deadline budget rather than getting its own; a slow common lookup
        // still surfaces as this request's timeout.
        let common = self.common_fanout_target(tenant).map(|(ct, cc)| self.search_one(ct, cc, q, k, filters));

        drop(permit);
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_latency("search", latency_ms);

        let result = match (primary, common) {
            (Err(e), _) => Err(e),
            (Ok(mut matches), Some(Ok(common_matches))) => {
                // Raw scores are compared directly across collections: both
                // share the same embedder, so no normalization step is
                // introduced.
                matches.extend(common_matches);
                matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                matches.truncate(k.max(1));
                Ok(matches)
            }
            (Ok(matches), Some(Err(_)) | None) => Ok(matches),
        };

        match result {
            Ok(matches) => {
                self.metrics.inc("matches_total", matches.len() as f64);
                self.ops_log.emit(OpEvent {
                    op: "search",
                    tenant: Some(tenant.to_string()),
                    collection: Some(collection.to_string()),
                    latency_ms,
                    status: "ok",
                    extras: vec![
                        ("k", serde_json::json!(k)),
                        ("hits", serde_json::json!(matches.len())),
                        ("request_id", serde_json::json!(request_id)),
                    ],
                    ..Default::default()
                });
                Ok(serde_json::json!({
                    "matches": matches,
                    "latency_ms": latency_ms,
                    "request_id": request_id,
                }))
            }
            Err(se) => {
                self.metrics.set_error(se.to_string());
                self.ops_log.emit(OpEvent {
                    op: "search",
                    tenant: Some(tenant.to_string()),
                    collection: Some(collection.to_string()),
                    latency_ms,
                    status: "error",
                    error_code: Some(se.code.to_string()),
                    ..Default::default()
                });
                Err(se)
            }
        }
    }

    // -- admin ------------------------------------------------------------

    pub fn dump_archive(&self, ctx: &AuthContext, output_path: Option<&std::path::Path>) -> Result<(PathBuf, Option<tempfile::TempDir>), ServiceError> {
        auth::require_admin(ctx)?;
        let data_dir = self.config.data_dir_path();
        match output_path {
            Some(p) => {
                archive::dump_archive(&self.store, &data_dir, p)?;
                Ok((p.to_path_buf(), None))
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("patchvec_export_")
                    .tempdir()
                    .map_err(|e| ServiceError::new("archive_dump_failed", e.to_string()))?;
                let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
                let archive_path = tmp.path().join(format!("patchvec-data-{timestamp}.zip"));
                archive::dump_archive(&self.store, &data_dir, &archive_path)?;
                Ok((archive_path, Some(tmp)))
            }
        }
    }

    pub fn restore_archive(&self, ctx: &AuthContext, archive_bytes: &[u8]) -> Result<serde_json::Value, ServiceError> {
        auth::require_admin(ctx)?;
        let data_dir = self.config.data_dir_path();
        archive::restore_archive(&self.store, &data_dir, archive_bytes)?;
        Ok(serde_json::json!({ "ok": true, "data_dir": data_dir.display().to_string() }))
    }

    pub fn reset_metrics(&self, ctx: &AuthContext) -> Result<serde_json::Value, ServiceError> {
        auth::require_admin(ctx)?;
        self.metrics.reset();
        Ok(serde_json::json!({ "ok": true, "reset_at": chrono::Utc::now().to_rfc3339() }))
    }

    pub fn metrics_snapshot(&self) -> serde_json::Value {
        self.metrics.snapshot(&BTreeMap::new())
    }

    pub fn metrics_prometheus(&self) -> String {
        self.metrics.to_prometheus(&BTreeMap::new())
    }

    /// Flush metrics to disk and close the ops log. Call once on shutdown.
    pub fn shutdown(&self) {
        self.metrics.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AuthContext {
        AuthContext { tenant: None, is_admin: true }
    }

    fn service(dir: &std::path::Path) -> PatchVecService {
        let mut cfg = Config::default();
        cfg.data_dir = dir.to_string_lossy().to_string();
        PatchVecService::new(cfg).unwrap()
    }

    #[test]
    fn s1_basic_ingest_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.create_collection(&admin(), "acme", "invoices").unwrap();

        let result = svc
            .ingest_document(&admin(), "acme", "invoices", "v.txt", b"Captain Nemo submarine voyage", Some("verne"), BTreeMap::new(), None, None)
            .unwrap();
        assert_eq!(result["ok"], true);

        let matches = svc.search(&admin(), "acme", "invoices", "submarine", 2, &RawFilters::new(), None).unwrap();
        let hits = matches["matches"].as_array().unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0]["chunk_id"].as_str().unwrap().starts_with("verne::"));
        assert!(hits[0]["match_reason"].as_str().unwrap().contains("semantic similarity"));
    }

    #[test]
    fn s2_idempotent_reingest() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.create_collection(&admin(), "acme", "reup").unwrap();

        svc.ingest_document(&admin(), "acme", "reup", "a.txt", b"alpha bravo charlie", Some("R-42"), BTreeMap::new(), None, None).unwrap();
        svc.ingest_document(&admin(), "acme", "reup", "a.txt", b"delta echo foxtrot", Some("R-42"), BTreeMap::new(), None, None).unwrap();

        let mut filters = RawFilters::new();
        filters.insert("docid".to_string(), vec!["R-42".to_string()]);
        let delta_hits = svc.search(&admin(), "acme", "reup", "delta", 5, &filters, None).unwrap();
        assert!(delta_hits["matches"].as_array().unwrap().iter().any(|m| m["text"].as_str().unwrap_or("").contains("delta")));

        let alpha_hits = svc.search(&admin(), "acme", "reup", "alpha", 5, &RawFilters::new(), None).unwrap();
        assert!(!alpha_hits["matches"].as_array().unwrap().iter().any(|m| m["text"].as_str().unwrap_or("").contains("alpha")));
    }

    #[test]
    fn s3_rename_collision() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.create_collection(&admin(), "acme", "foo").unwrap();
        svc.create_collection(&admin(), "acme", "bar").unwrap();

        let err = svc.rename_collection(&admin(), "acme", "bar", "foo").unwrap_err();
        assert_eq!(err.code, "collection_conflict");

        svc.delete_collection(&admin(), "acme", "foo").unwrap();
        svc.rename_collection(&admin(), "acme", "bar", "foo").unwrap();
    }

    #[test]
    fn s6_archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.create_collection(&admin(), "tenant", "collection").unwrap();
        svc.ingest_document(&admin(), "tenant", "collection", "doc.txt", b"hello endpoint", Some("DOC"), BTreeMap::new(), None, None).unwrap();

        let (archive_path, _tmp) = svc.dump_archive(&admin(), None).unwrap();
        let archive_bytes = std::fs::read(&archive_path).unwrap();

        std::fs::remove_dir_all(svc.config().data_dir_path()).unwrap();
        svc.restore_archive(&admin(), &archive_bytes).unwrap();

        let matches = svc.search(&admin(), "tenant", "collection", "hello", 5, &RawFilters::new(), None).unwrap();
        assert!(!matches["matches"].as_array().unwrap().is_empty());
    }

    #[test]
    fn delete_document_of_missing_doc_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.create_collection(&admin(), "acme", "c1").unwrap();
        let result = svc.delete_document(&admin(), "acme", "c1", "ghost").unwrap();
        assert_eq!(result["chunks_deleted"], 0);
    }

    #[test]
    fn reset_metrics_requires_admin() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let non_admin = AuthContext { tenant: Some("acme".to_string()), is_admin: false };
        let err = svc.reset_metrics(&non_admin).unwrap_err();
        assert_eq!(err.code, "admin_required");
    }
}
