//! The collection store: persistent per-(tenant, collection) state and the
//! idempotent document-level mutators and query execution described in
//! `spec.md` §4.1–§4.2. Grounded on `pave/stores/txtai_store.py`'s
//! `TxtaiStore`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use patchvec_engine::{pre_filter_clause, Embedder, EngineRow, InMemoryEngine, PreFilterClause, QueryEngine};
use patchvec_model::{CollectionId, Match, MetaValue, RawFilters, TenantId};

use crate::adapter::{build_match_reason, build_sql, matches_filters, split_filters, DEFAULT_MAX_QUERY_CHARS};
use crate::atomic::{read_json, read_text_sidecar, write_json_atomic, write_text_sidecar};
use crate::error::StoreError;
use crate::locks::LockRegistry;
use crate::paths;
use crate::sanitize::sanit_meta_dict;

/// One record to be indexed, already normalized to canonical shape by the
/// caller (the ingestion pipeline): a local chunk id (with or without the
/// `<docid>::` prefix already applied) and its text and metadata.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub local_id: String,
    pub text: String,
    pub meta: BTreeMap<String, MetaValue>,
}

struct CollectionHandle {
    engine: InMemoryEngine,
    catalog: BTreeMap<String, Vec<String>>,
    meta: BTreeMap<String, BTreeMap<String, MetaValue>>,
}

/// Owns every collection's persistent state and the per-collection lock
/// registry. One instance per process; shared via `Arc` by the service
/// layer.
pub struct CollectionStore {
    data_dir: PathBuf,
    handles: Mutex<HashMap<(TenantId, CollectionId), CollectionHandle>>,
    locks: LockRegistry,
    embedder: Arc<dyn Embedder>,
}

impl CollectionStore {
    pub fn new(data_dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            data_dir: data_dir.into(),
            handles: Mutex::new(HashMap::new()),
            locks: LockRegistry::new(),
            embedder,
        }
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    /// Creates the on-disk layout and loads persisted state if present.
    /// Idempotent; a corrupt index is logged and replaced with an empty
    /// one rather than failing.
    pub fn load_or_init(&self, tenant: &TenantId, collection: &CollectionId) -> Result<(), StoreError> {
        let key = (tenant.clone(), collection.clone());
        if self.handles.lock().unwrap().contains_key(&key) {
            return Ok(());
        }
        self.locks.with_lock(tenant, collection, || {
            let mut handles = self.handles.lock().unwrap();
            if handles.contains_key(&key) {
                return Ok(());
            }
            let dir = paths::collection_dir(&self.data_dir, tenant, collection);
            fs::create_dir_all(paths::index_dir(&dir))?;
            fs::create_dir_all(paths::chunks_dir(&dir))?;

            let marker = paths::index_marker(&dir);
            let engine = if marker.exists() {
                match InMemoryEngine::load(&marker) {
                    Ok(e) => e,
                    Err(err) => {
                        tracing::warn!(%err, tenant = %tenant, collection = %collection, "corrupt index, reinitializing empty");
                        InMemoryEngine::new()
                    }
                }
            } else {
                InMemoryEngine::new()
            };

            let catalog = read_json(&paths::catalog_path(&dir));
            let meta = read_json(&paths::meta_path(&dir));

            handles.insert(key.clone(), CollectionHandle { engine, catalog, meta });
            Ok(())
        })
    }

    /// Persists the current index; no-op if the handle isn't loaded.
    pub fn save(&self, tenant: &TenantId, collection: &CollectionId) -> Result<(), StoreError> {
        self.locks.with_lock(tenant, collection, || {
            let handles = self.handles.lock().unwrap();
            if let Some(handle) = handles.get(&(tenant.clone(), collection.clone())) {
                let dir = paths::collection_dir(&self.data_dir, tenant, collection);
                handle.engine.save(&paths::index_marker(&dir))?;
            }
            Ok(())
        })
    }

    pub fn delete_collection(&self, tenant: &TenantId, collection: &CollectionId) -> Result<(), StoreError> {
        self.locks.with_lock(tenant, collection, || {
            self.handles.lock().unwrap().remove(&(tenant.clone(), collection.clone()));
            let dir = paths::collection_dir(&self.data_dir, tenant, collection);
            match fs::remove_dir_all(&dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::Io(e)),
            }
        })
    }

    pub fn rename_collection(
        &self,
        tenant: &TenantId,
        old: &CollectionId,
        new: &CollectionId,
    ) -> Result<(), StoreError> {
        if old == new {
            return Err(StoreError::RenameInvalid("source and target are the same".into()));
        }
        self.locks
            .with_two_locks((tenant, old), (tenant, new), || {
                let old_dir = paths::collection_dir(&self.data_dir, tenant, old);
                let new_dir = paths::collection_dir(&self.data_dir, tenant, new);
                if !old_dir.join("catalog.json").exists() && !self.handles.lock().unwrap().contains_key(&(tenant.clone(), old.clone())) {
                    return Err(StoreError::CollectionNotFound {
                        tenant: tenant.to_string(),
                        collection: old.to_string(),
                    });
                }
                if new_dir.exists() {
                    return Err(StoreError::CollectionConflict {
                        tenant: tenant.to_string(),
                        collection: new.to_string(),
                    });
                }
                if old_dir.exists() {
                    fs::create_dir_all(old_dir.parent().unwrap())?;
                    fs::rename(&old_dir, &new_dir)?;
                }
                let mut handles = self.handles.lock().unwrap();
                if let Some(handle) = handles.remove(&(tenant.clone(), old.clone())) {
                    handles.insert((tenant.clone(), new.clone()), handle);
                }
                Ok(())
            })
    }

    /// Names of directories under the tenant that contain a `catalog.json`.
    pub fn list_collections(&self, tenant: &TenantId) -> Vec<String> {
        let dir = paths::tenant_dir(&self.data_dir, tenant);
        let mut out = Vec::new();
        let Ok(entries) = fs::read_dir(&dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(collection) = name.strip_prefix("c_") {
                if entry.path().join("catalog.json").exists() {
                    out.push(collection.to_string());
                }
            }
        }
        out.sort();
        out
    }

    /// Scan `t_*/c_*` directories under `data_dir` for every known
    /// collection key, for the archive engine's global lock acquisition.
    pub fn discover_all_collection_keys(&self) -> Vec<(TenantId, CollectionId)> {
        let mut out = Vec::new();
        let Ok(tenants) = fs::read_dir(&self.data_dir) else {
            return out;
        };
        for tenant_entry in tenants.flatten() {
            let tenant_name = tenant_entry.file_name().to_string_lossy().into_owned();
            let Some(tenant) = tenant_name.strip_prefix("t_") else {
                continue;
            };
            let Ok(collections) = fs::read_dir(tenant_entry.path()) else {
                continue;
            };
            for collection_entry in collections.flatten() {
                let collection_name = collection_entry.file_name().to_string_lossy().into_owned();
                if let Some(collection) = collection_name.strip_prefix("c_") {
                    out.push((TenantId::new(tenant), CollectionId::new(collection)));
                }
            }
        }
        out.sort();
        out
    }

    /// Acquire every known collection's lock, in deterministic order, for
    /// the duration of `f` (the archive engine's dump/restore critical
    /// section).
    pub fn with_all_locks<T>(&self, f: impl FnOnce() -> T) -> T {
        let keys = self.discover_all_collection_keys();
        self.locks.with_all_locks(&keys, f)
    }

    /// Tenant names derived from `t_*` directories directly under `data_dir`.
    pub fn list_tenants(&self) -> Vec<String> {
        let mut out = Vec::new();
        let Ok(entries) = fs::read_dir(&self.data_dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(tenant) = name.strip_prefix("t_") {
                out.push(tenant.to_string());
            }
        }
        out.sort();
        out
    }

    pub fn has_doc(&self, tenant: &TenantId, collection: &CollectionId, docid: &str) -> Result<bool, StoreError> {
        self.load_or_init(tenant, collection)?;
        Ok(self.locks.with_lock(tenant, collection, || {
            self.handles
                .lock()
                .unwrap()
                .get(&(tenant.clone(), collection.clone()))
                .map(|h| h.catalog.get(docid).map(|ids| !ids.is_empty()).unwrap_or(false))
                .unwrap_or(false)
        }))
    }

    /// Removes chunk metadata, text sidecars, catalog entry, and engine
    /// entries for every chunk id of `docid`. Returns the count removed.
    /// Engine delete failures are logged but non-fatal.
    pub fn purge_doc(&self, tenant: &TenantId, collection: &CollectionId, docid: &str) -> Result<usize, StoreError> {
        self.load_or_init(tenant, collection)?;
        self.locks.with_lock(tenant, collection, || {
            let dir = paths::collection_dir(&self.data_dir, tenant, collection);
            let mut handles = self.handles.lock().unwrap();
            let handle = handles.get_mut(&(tenant.clone(), collection.clone())).unwrap();

            let ids = handle.catalog.remove(docid).unwrap_or_default();
            if ids.is_empty() {
                return Ok(0);
            }

            for id in &ids {
                handle.meta.remove(id);
                let _ = fs::remove_file(paths::chunk_sidecar_path(&dir, id));
            }
            if let Err(err) = handle.engine.delete(&ids) {
                tracing::warn!(%err, docid, "engine delete failed during purge; sidecars remain authoritative");
            }

            write_json_atomic(&paths::catalog_path(&dir), &handle.catalog)?;
            write_json_atomic(&paths::meta_path(&dir), &handle.meta)?;
            handle.engine.save(&paths::index_marker(&dir))?;
            Ok(ids.len())
        })
    }

    /// Atomic replace: normalizes every record, writes its text sidecar,
    /// rewrites catalog and metadata, upserts into the engine, persists.
    /// Callers re-ingesting a `docid` must call [`Self::purge_doc`] first.
    pub fn index_records(
        &self,
        tenant: &TenantId,
        collection: &CollectionId,
        docid: &str,
        records: Vec<IndexRecord>,
    ) -> Result<usize, StoreError> {
        self.load_or_init(tenant, collection)?;
        let dir = paths::collection_dir(&self.data_dir, tenant, collection);

        let mut chunk_ids = Vec::with_capacity(records.len());
        let mut prepared: Vec<(String, String, BTreeMap<String, MetaValue>)> = Vec::new();
        for record in records {
            if record.text.is_empty() || record.local_id.is_empty() {
                continue;
            }
            let chunk_id = if record.local_id.starts_with(&format!("{docid}::")) {
                record.local_id
            } else {
                format!("{docid}::{}", record.local_id)
            };
            let mut meta = sanit_meta_dict(&record.meta);
            meta.insert("docid".to_string(), MetaValue::String(docid.to_string()));

            write_text_sidecar(&paths::chunk_sidecar_path(&dir, &chunk_id), &record.text)?;
            if read_text_sidecar(&paths::chunk_sidecar_path(&dir, &chunk_id)).as_deref() != Some(record.text.as_str()) {
                tracing::warn!(chunk_id, "sidecar round-trip mismatch");
            }

            chunk_ids.push(chunk_id.clone());
            prepared.push((chunk_id, record.text, meta));
        }

        if prepared.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = prepared.iter().map(|(_, t, _)| t.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        self.locks.with_lock(tenant, collection, || {
            let mut handles = self.handles.lock().unwrap();
            let handle = handles.get_mut(&(tenant.clone(), collection.clone())).unwrap();

            let rows: Vec<EngineRow> = prepared
                .iter()
                .zip(embeddings.into_iter())
                .map(|((id, text, meta), embedding)| EngineRow {
                    id: id.clone(),
                    text: text.clone(),
                    embedding,
                    meta: meta.clone(),
                })
                .collect();
            handle.engine.upsert(rows)?;

            for (chunk_id, _, meta) in &prepared {
                handle.meta.insert(chunk_id.clone(), meta.clone());
            }
            handle.catalog.insert(docid.to_string(), chunk_ids.clone());

            write_json_atomic(&paths::catalog_path(&dir), &handle.catalog)?;
            write_json_atomic(&paths::meta_path(&dir), &handle.meta)?;
            handle.engine.save(&paths::index_marker(&dir))?;
            Ok(prepared.len())
        })
    }

    /// Overfetch, filter split, SQL assembly, post-filter, hydration, and
    /// match-reason assembly, per `spec.md` §4.2.
    pub fn search(
        &self,
        tenant: &TenantId,
        collection: &CollectionId,
        query: &str,
        k: usize,
        filters: &RawFilters,
    ) -> Result<Vec<Match>, StoreError> {
        self.load_or_init(tenant, collection)?;
        let kk = k.max(1);
        let fetch_k = (5 * kk).max(50);

        let split = split_filters(filters);
        let truncated_query = truncate_chars(query.trim(), DEFAULT_MAX_QUERY_CHARS);
        let sql = build_sql(&truncated_query, &split.pre, fetch_k, DEFAULT_MAX_QUERY_CHARS);
        let embedding = self.embedder.embed(&truncated_query)?;
        let pre_clauses: Vec<PreFilterClause> = split
            .pre
            .iter()
            .filter_map(|(field, values)| pre_filter_clause(field, values))
            .collect();

        let dir = paths::collection_dir(&self.data_dir, tenant, collection);
        self.locks.with_lock(tenant, collection, || {
            let mut handles = self.handles.lock().unwrap();
            let handle = handles.get_mut(&(tenant.clone(), collection.clone())).unwrap();

            let hits = handle.engine.search(&embedding, &pre_clauses, &sql, fetch_k)?;

            let mut kept = Vec::with_capacity(kk);
            for hit in hits {
                if hit.id.is_empty() {
                    continue;
                }
                let meta = handle.meta.get(&hit.id).cloned().unwrap_or_default();
                if !matches_filters(&meta, &split.post) {
                    continue;
                }
                kept.push((hit, meta));
                if kept.len() >= kk {
                    break;
                }
            }

            let missing: Vec<String> = kept
                .iter()
                .filter(|(hit, _)| hit.text.is_none())
                .map(|(hit, _)| hit.id.clone())
                .collect();
            let hydrated = handle.engine.lookup(&missing);

            let matches = kept
                .into_iter()
                .map(|(hit, meta)| {
                    let text = hit.text.clone().or_else(|| hydrated.get(&hit.id).cloned()).or_else(|| {
                        read_text_sidecar(&paths::chunk_sidecar_path(&dir, &hit.id))
                    });
                    let reason = build_match_reason(&truncated_query, hit.score, filters, &meta);
                    Match {
                        chunk_id: hit.id,
                        score: hit.score,
                        text,
                        tenant: tenant.to_string(),
                        collection: collection.to_string(),
                        meta,
                        match_reason: reason,
                    }
                })
                .collect();
            Ok(matches)
        })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if max == 0 || s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
