//! Process-wide counters and per-operation latency percentiles, with a
//! dirty-flag-gated atomic flush to `<data_dir>/metrics.json`.

use patchvec_store::atomic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

const LATENCY_WINDOW: usize = 1000;
const METRICS_FILE: &str = "metrics.json";

const COUNTER_NAMES: &[&str] = &[
    "requests_total",
    "collections_created_total",
    "collections_deleted_total",
    "collections_renamed_total",
    "documents_indexed_total",
    "documents_deleted_total",
    "chunks_indexed_total",
    "purge_total",
    "search_total",
    "matches_total",
    "errors_total",
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    counters: BTreeMap<String, f64>,
    last_error: Option<String>,
    latencies: BTreeMap<String, Vec<f64>>,
}

struct Inner {
    counters: BTreeMap<String, f64>,
    last_error: Option<String>,
    latencies: BTreeMap<String, VecDeque<f64>>,
    dirty: bool,
}

impl Inner {
    fn fresh() -> Self {
        let counters = COUNTER_NAMES.iter().map(|n| (n.to_string(), 0.0)).collect();
        let mut latencies = BTreeMap::new();
        latencies.insert("search".to_string(), VecDeque::with_capacity(LATENCY_WINDOW));
        latencies.insert("ingest".to_string(), VecDeque::with_capacity(LATENCY_WINDOW));
        Self { counters, last_error: None, latencies, dirty: false }
    }
}

/// Thread-safe metrics sink: counters, latency ring buffers, percentile
/// computation, and JSON persistence.
pub struct Metrics {
    inner: Mutex<Inner>,
    started: Instant,
    data_dir: Option<PathBuf>,
}

impl Metrics {
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        let metrics = Self { inner: Mutex::new(Inner::fresh()), started: Instant::now(), data_dir };
        metrics.load();
        metrics
    }

    fn path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join(METRICS_FILE))
    }

    fn load(&self) {
        let Some(path) = self.path() else { return };
        let persisted: Persisted = atomic::read_json(&path);
        let mut inner = self.inner.lock().unwrap();
        for (k, v) in persisted.counters {
            if inner.counters.contains_key(&k) {
                inner.counters.insert(k, v);
            }
        }
        inner.last_error = persisted.last_error;
        for (op, samples) in persisted.latencies {
            let window = inner.latencies.entry(op).or_insert_with(|| VecDeque::with_capacity(LATENCY_WINDOW));
            window.clear();
            let start = samples.len().saturating_sub(LATENCY_WINDOW);
            window.extend(samples[start..].iter().copied());
        }
    }

    /// Persist to `<data_dir>/metrics.json` regardless of the dirty flag.
    pub fn save(&self) {
        let Some(path) = self.path() else { return };
        let mut inner = self.inner.lock().unwrap();
        let persisted = Persisted {
            counters: inner.counters.clone(),
            last_error: inner.last_error.clone(),
            latencies: inner.latencies.iter().map(|(k, v)| (k.clone(), v.iter().copied().collect())).collect(),
        };
        inner.dirty = false;
        drop(inner);
        let _ = atomic::write_json_atomic(&path, &persisted);
    }

    /// Persist only if a mutation happened since the last save.
    pub fn flush(&self) {
        if self.inner.lock().unwrap().dirty {
            self.save();
        }
    }

    pub fn inc(&self, name: &str, value: f64) {
        let mut inner = self.inner.lock().unwrap();
        *inner.counters.entry(name.to_string()).or_insert(0.0) += value;
        inner.dirty = true;
    }

    pub fn set_error(&self, msg: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_error = Some(msg.into());
        *inner.counters.entry("errors_total".to_string()).or_insert(0.0) += 1.0;
        inner.dirty = true;
    }

    pub fn record_latency(&self, op: &str, duration_ms: f64) {
        let mut inner = self.inner.lock().unwrap();
        let window = inner
            .latencies
            .entry(op.to_string())
            .or_insert_with(|| VecDeque::with_capacity(LATENCY_WINDOW));
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(duration_ms);
        inner.dirty = true;
    }

    /// Time a closure and record its latency under `op`; returns the
    /// closure's result unchanged.
    pub fn timed<T>(&self, op: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.record_latency(op, start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        for v in inner.counters.values_mut() {
            *v = 0.0;
        }
        inner.last_error = None;
        for window in inner.latencies.values_mut() {
            window.clear();
        }
        drop(inner);
        self.save();
    }

    fn percentiles(&self, op: &str) -> LatencyPercentiles {
        let inner = self.inner.lock().unwrap();
        let mut samples: Vec<f64> = inner.latencies.get(op).map(|w| w.iter().copied().collect()).unwrap_or_default();
        drop(inner);
        if samples.is_empty() {
            return LatencyPercentiles::default();
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
        LatencyPercentiles {
            p50: round2(percentile(&samples, 50.0)),
            p95: round2(percentile(&samples, 95.0)),
            p99: round2(percentile(&samples, 99.0)),
            count: samples.len(),
        }
    }

    pub fn snapshot(&self, extra: &BTreeMap<String, serde_json::Value>) -> serde_json::Value {
        let (counters, last_error) = {
            let inner = self.inner.lock().unwrap();
            (inner.counters.clone(), inner.last_error.clone())
        };
        let mut map = serde_json::Map::new();
        for (k, v) in counters {
            map.insert(k, serde_json::json!(v));
        }
        map.insert("uptime_seconds".to_string(), serde_json::json!(self.started.elapsed().as_secs_f64()));
        map.insert("last_error".to_string(), serde_json::json!(last_error));
        for op in ["search", "ingest"] {
            let pcts = self.percentiles(op);
            map.insert(format!("{op}_latency_p50_ms"), serde_json::json!(pcts.p50));
            map.insert(format!("{op}_latency_p95_ms"), serde_json::json!(pcts.p95));
            map.insert(format!("{op}_latency_p99_ms"), serde_json::json!(pcts.p99));
            map.insert(format!("{op}_latency_count"), serde_json::json!(pcts.count));
        }
        for (k, v) in extra {
            map.insert(k.clone(), v.clone());
        }
        serde_json::Value::Object(map)
    }

    pub fn to_prometheus(&self, build: &BTreeMap<String, String>) -> String {
        let snap = self.snapshot(&BTreeMap::new());
        let mut out = String::new();
        if let serde_json::Value::Object(map) = snap {
            for (k, v) in map {
                if let Some(n) = v.as_f64() {
                    out.push_str(&format!("patchvec_{k} {n}\n"));
                }
            }
        }
        if !build.is_empty() {
            let labels = build.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect::<Vec<_>>().join(",");
            out.push_str(&format!("patchvec_build_info{{{labels}}} 1\n"));
        }
        out
    }
}

#[derive(Default)]
struct LatencyPercentiles {
    p50: f64,
    p95: f64,
    p99: f64,
    count: usize,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let k = (sorted.len() - 1) as f64 * p / 100.0;
    let f = k.floor() as usize;
    let c = if f + 1 < sorted.len() { f + 1 } else { f };
    sorted[f] + (k - f as f64) * (sorted[c] - sorted[f])
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_empty_are_zero() {
        let m = Metrics::new(None);
        let snap = m.snapshot(&BTreeMap::new());
        assert_eq!(snap["search_latency_count"], 0);
        assert_eq!(snap["search_latency_p50_ms"], 0.0);
    }

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new(None);
        m.inc("search_total", 1.0);
        m.inc("search_total", 2.0);
        let snap = m.snapshot(&BTreeMap::new());
        assert_eq!(snap["search_total"], 3.0);
    }

    #[test]
    fn persist_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let m1 = Metrics::new(Some(dir.path().to_path_buf()));
        m1.inc("search_total", 5.0);
        m1.record_latency("search", 12.5);
        m1.save();

        let m2 = Metrics::new(Some(dir.path().to_path_buf()));
        let snap = m2.snapshot(&BTreeMap::new());
        assert_eq!(snap["search_total"], 5.0);
        assert_eq!(snap["search_latency_count"], 1);
    }

    #[test]
    fn reset_zeroes_everything() {
        let m = Metrics::new(None);
        m.inc("search_total", 4.0);
        m.record_latency("search", 10.0);
        m.reset();
        let snap = m.snapshot(&BTreeMap::new());
        assert_eq!(snap["search_total"], 0.0);
        assert_eq!(snap["search_latency_count"], 0);
    }

    #[test]
    fn flush_is_a_noop_when_not_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let m = Metrics::new(Some(dir.path().to_path_buf()));
        m.flush();
        assert!(!dir.path().join(METRICS_FILE).exists());
    }
}
