//! Layered configuration: built-in defaults, an optional YAML file, an
//! optional tenants file referenced from it, then environment variable
//! overrides of the form `PATCHVEC_<SECTION>__<KEY>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: String,
    pub global_key: Option<String>,
    pub api_keys: BTreeMap<String, String>,
    pub default_access_tenant: Option<String>,
    pub tenants_file: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: "none".to_string(),
            global_key: None,
            api_keys: BTreeMap::new(),
            default_access_tenant: None,
            tenants_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_file_size_mb: u64,
    pub max_concurrent: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { max_file_size_mb: 500, max_concurrent: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_concurrent: usize,
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { max_concurrent: 8, timeout_ms: 5000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantLimit {
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantsConfig {
    pub default_max_concurrent: usize,
    #[serde(flatten)]
    pub per_tenant: BTreeMap<String, TenantLimit>,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self { default_max_concurrent: 0, per_tenant: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub timeout_keep_alive: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8088, timeout_keep_alive: 75 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub ops_log: Option<String>,
    pub access_log: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), ops_log: None, access_log: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub txt_chunk_size: usize,
    pub txt_chunk_overlap: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { txt_chunk_size: 1000, txt_chunk_overlap: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: String,
    pub common_enabled: bool,
    pub common_tenant: Option<String>,
    pub common_collection: Option<String>,
    pub auth: AuthConfig,
    pub ingest: IngestConfig,
    pub search: SearchConfig,
    pub tenants: TenantsConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
    pub preprocess: PreprocessConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            common_enabled: false,
            common_tenant: None,
            common_collection: None,
            auth: AuthConfig::default(),
            ingest: IngestConfig::default(),
            search: SearchConfig::default(),
            tenants: TenantsConfig::default(),
            server: ServerConfig::default(),
            log: LogConfig::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

const ENV_PREFIX: &str = "PATCHVEC_";

impl Config {
    /// Load defaults, merge a YAML file (if present), merge its
    /// `auth.tenants_file` (if present), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut value = serde_yaml::to_value(Config::default()).map_err(ConfigError::Yaml)?;

        if let Some(p) = path {
            if let Some(file_value) = read_yaml(p)? {
                merge(&mut value, file_value);
            }
        }

        if let Some(tenants_file) = value
            .get("auth")
            .and_then(|a| a.get("tenants_file"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
        {
            if let Some(tenants_value) = read_yaml(Path::new(&tenants_file))? {
                merge(&mut value, tenants_value);
            }
        }

        apply_env(&mut value);

        serde_yaml::from_value(value).map_err(ConfigError::Yaml)
    }

    pub fn data_dir_path(&self) -> PathBuf {
        expand_tilde(&self.data_dir)
    }

    pub fn tenant_limit(&self, tenant: &str) -> usize {
        self.tenants
            .per_tenant
            .get(tenant)
            .map(|t| t.max_concurrent)
            .unwrap_or(self.tenants.default_max_concurrent)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Yaml(serde_yaml::Error),
}

fn read_yaml(path: &Path) -> Result<Option<serde_yaml::Value>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_yaml::from_str(&text).map_err(ConfigError::Yaml)?))
}

/// Deep-merge `b` into `a`, `b`'s scalars and maps winning on conflict.
fn merge(a: &mut serde_yaml::Value, b: serde_yaml::Value) {
    use serde_yaml::Value;
    match (a, b) {
        (Value::Mapping(am), Value::Mapping(bm)) => {
            for (k, v) in bm {
                match am.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        am.insert(k, v);
                    }
                }
            }
        }
        (a_slot, b_val) => {
            *a_slot = b_val;
        }
    }
}

/// Apply `PATCHVEC_<SECTION>__<KEY>` environment overrides, coercing
/// booleans and numerics the way the source's `_coerce` helper does.
fn apply_env(value: &mut serde_yaml::Value) {
    for (key, raw) in std::env::vars() {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else { continue };
        let path: Vec<String> = rest.to_lowercase().split("__").map(str::to_string).collect();
        if path.is_empty() {
            continue;
        }
        set_path(value, &path, coerce(&raw));
    }
}

fn set_path(root: &mut serde_yaml::Value, path: &[String], leaf: serde_yaml::Value) {
    use serde_yaml::{Mapping, Value};
    if !root.is_mapping() {
        *root = Value::Mapping(Mapping::new());
    }
    let map = root.as_mapping_mut().unwrap();
    if path.len() == 1 {
        map.insert(Value::String(path[0].clone()), leaf);
        return;
    }
    let key = Value::String(path[0].clone());
    let entry = map.entry(key).or_insert_with(|| Value::Mapping(Mapping::new()));
    set_path(entry, &path[1..], leaf);
}

fn coerce(raw: &str) -> serde_yaml::Value {
    let lower = raw.to_lowercase();
    if lower == "true" || lower == "false" {
        return serde_yaml::Value::Bool(lower == "true");
    }
    if let Ok(i) = raw.parse::<i64>() {
        return serde_yaml::Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        return serde_yaml::Value::Number(serde_yaml::Number::from(f));
    }
    serde_yaml::Value::String(raw.to_string())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_yaml() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.data_dir, "./data");
        assert_eq!(cfg.auth.mode, "none");
        assert_eq!(cfg.search.timeout_ms, 5000);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "data_dir: /srv/patchvec\nsearch:\n  timeout_ms: 1234\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.data_dir, "/srv/patchvec");
        assert_eq!(cfg.search.timeout_ms, 1234);
        assert_eq!(cfg.ingest.max_file_size_mb, 500);
    }

    #[test]
    fn tenant_limit_falls_back_to_default() {
        let mut cfg = Config::default();
        cfg.tenants.default_max_concurrent = 3;
        cfg.tenants.per_tenant.insert("acme".to_string(), TenantLimit { max_concurrent: 10 });
        assert_eq!(cfg.tenant_limit("acme"), 10);
        assert_eq!(cfg.tenant_limit("other"), 3);
    }

    #[test]
    fn nested_tenant_limit_parses_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "tenants:\n  default_max_concurrent: 2\n  acme:\n    max_concurrent: 10\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.tenant_limit("acme"), 10);
        assert_eq!(cfg.tenant_limit("other"), 2);
    }

    #[test]
    fn env_override_coerces_numeric() {
        std::env::set_var("PATCHVEC_SEARCH__TIMEOUT_MS", "999");
        let cfg = Config::load(None).unwrap();
        std::env::remove_var("PATCHVEC_SEARCH__TIMEOUT_MS");
        assert_eq!(cfg.search.timeout_ms, 999);
    }
}
