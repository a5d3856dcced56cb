//! The embedding/index engine capability: vector similarity plus a
//! metadata-aware, SQL-like filter language, full-record upsert/delete/
//! lookup, and save/load of the on-disk index. A real backend (e.g. a
//! vector database) is an external collaborator; [`InMemoryEngine`] is the
//! reference implementation used by the collection store and by tests.
//!
//! The collection store's query adapter builds a conceptual SQL string for
//! observability parity with the source system, but passes the same
//! predicate to the engine here as a structured [`PreFilterClause`] list —
//! parsing a SQL dialect is the external engine's job, not this crate's.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use patchvec_model::{FilterValue, MetaValue};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// One field's pre-filter predicate: OR across `exact` values, OR across
/// `negated` values (a row matches the clause if it equals any `exact`
/// value or differs from any `negated` value), mirroring the SQL
/// `(<field> = 'v1a' OR <field> <> 'v1b' OR …)` grouping in the adapter.
#[derive(Debug, Clone, Default)]
pub struct PreFilterClause {
    pub field: String,
    pub exact: Vec<String>,
    pub negated: Vec<String>,
}

impl PreFilterClause {
    pub fn matches(&self, stored: Option<&MetaValue>) -> bool {
        let stored_str = stored.map(|v| v.display_string());
        let exact_hit = self
            .exact
            .iter()
            .any(|v| stored_str.as_deref() == Some(v.as_str()));
        let negated_hit = self
            .negated
            .iter()
            .any(|v| stored_str.as_deref() != Some(v.as_str()));
        if self.exact.is_empty() && self.negated.is_empty() {
            return true;
        }
        exact_hit || negated_hit
    }
}

/// Build pre-filter clauses from parsed filter values for one field,
/// keeping only the pre-filterable ones ([`FilterValue::Exact`] and
/// [`FilterValue::Negated`]). Returns `None` if the field has no
/// pre-filterable values.
pub fn pre_filter_clause(field: &str, values: &[FilterValue]) -> Option<PreFilterClause> {
    let mut clause = PreFilterClause {
        field: field.to_string(),
        ..Default::default()
    };
    for v in values {
        match v {
            FilterValue::Exact(s) => clause.exact.push(s.clone()),
            FilterValue::Negated(s) => clause.negated.push(s.clone()),
            _ => {}
        }
    }
    if clause.exact.is_empty() && clause.negated.is_empty() {
        None
    } else {
        Some(clause)
    }
}

/// One full record as stored by the engine: id, text, embedding, metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRow {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub meta: BTreeMap<String, MetaValue>,
}

/// One similarity hit returned by [`QueryEngine::search`].
#[derive(Debug, Clone)]
pub struct EngineHit {
    pub id: String,
    pub score: f64,
    pub text: Option<String>,
}

/// The capability the collection store depends on: similarity search with
/// pre-filtering, full-record upsert, id-based delete, id-based lookup, and
/// on-disk persistence.
pub trait QueryEngine: Send + Sync {
    fn upsert(&mut self, rows: Vec<EngineRow>) -> Result<(), EngineError>;
    fn delete(&mut self, ids: &[String]) -> Result<(), EngineError>;
    fn lookup(&self, ids: &[String]) -> HashMap<String, String>;
    /// `sql` is the conceptual query text assembled by the adapter, carried
    /// through for ops-log/debugging parity; `pre_filter` is the structured
    /// predicate actually evaluated.
    fn search(
        &self,
        query_embedding: &[f32],
        pre_filter: &[PreFilterClause],
        sql: &str,
        limit: usize,
    ) -> Result<Vec<EngineHit>, EngineError>;
    fn save(&self, path: &Path) -> Result<(), EngineError>;
    fn load(path: &Path) -> Result<Self, EngineError>
    where
        Self: Sized;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory reference engine: linear-scan cosine similarity plus the
/// structured pre-filter. Adequate for the data volumes a single-node
/// collection handles and for deterministic tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryEngine {
    rows: BTreeMap<String, EngineRow>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueryEngine for InMemoryEngine {
    fn upsert(&mut self, rows: Vec<EngineRow>) -> Result<(), EngineError> {
        for row in rows {
            self.rows.insert(row.id.clone(), row);
        }
        Ok(())
    }

    fn delete(&mut self, ids: &[String]) -> Result<(), EngineError> {
        for id in ids {
            self.rows.remove(id);
        }
        Ok(())
    }

    fn lookup(&self, ids: &[String]) -> HashMap<String, String> {
        ids.iter()
            .filter_map(|id| self.rows.get(id).map(|row| (id.clone(), row.text.clone())))
            .collect()
    }

    fn search(
        &self,
        query_embedding: &[f32],
        pre_filter: &[PreFilterClause],
        _sql: &str,
        limit: usize,
    ) -> Result<Vec<EngineHit>, EngineError> {
        let mut scored: Vec<EngineHit> = self
            .rows
            .values()
            .filter(|row| {
                pre_filter
                    .iter()
                    .all(|clause| clause.matches(row.meta.get(&clause.field)))
            })
            .map(|row| EngineHit {
                id: row.id.clone(),
                score: cosine_similarity(query_embedding, &row.embedding),
                text: Some(row.text.clone()),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
            serde_json::to_writer(&mut tmp, self)?;
            use std::io::Write;
            tmp.flush()?;
            tmp.as_file().sync_all()?;
            tmp.persist(path).map_err(|e| e.error)?;
        } else {
            serde_json::to_writer(fs::File::create(path)?, self)?;
        }
        Ok(())
    }

    fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = fs::read(path)?;
        match serde_json::from_slice(&data) {
            Ok(engine) => Ok(engine),
            Err(_) => Ok(Self::new()),
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        na += (*x as f64) * (*x as f64);
        nb += (*y as f64) * (*y as f64);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
