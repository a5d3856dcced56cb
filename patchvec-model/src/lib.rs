//! Shared data model for PatchVec: tenant/collection identifiers, the typed
//! metadata container, chunk and match records, and the filter-value grammar
//! used by the query engine adapter.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Recursion bound shared by metadata coercion and post-filter matching.
pub const MAX_FILTER_DEPTH: usize = 10;

/// A tenant identifier. Scopes collections; carries no limits itself (those
/// live in service configuration).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

/// A collection name, unique within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub String);

macro_rules! string_newtype {
    ($ty:ident) => {
        impl $ty {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $ty {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_newtype!(TenantId);
string_newtype!(CollectionId);

/// A dynamically-typed metadata value: every value coerced from an untyped
/// source (JSON form fields, sanitized strings) lands in one of these
/// shapes, bounded by [`MAX_FILTER_DEPTH`] when recursing into lists/maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Build a `MetaValue` from a `serde_json::Value`, truncating recursion
    /// at [`MAX_FILTER_DEPTH`] (a value at the cap collapses to its string
    /// rendering, mirroring the depth-capped recursive matcher).
    pub fn from_json(v: &serde_json::Value) -> Self {
        Self::from_json_depth(v, 0)
    }

    fn from_json_depth(v: &serde_json::Value, depth: usize) -> Self {
        if depth >= MAX_FILTER_DEPTH {
            return MetaValue::String(v.to_string());
        }
        match v {
            serde_json::Value::Null => MetaValue::Null,
            serde_json::Value::Bool(b) => MetaValue::Bool(*b),
            serde_json::Value::Number(n) => MetaValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => MetaValue::String(s.clone()),
            serde_json::Value::Array(items) => MetaValue::List(
                items
                    .iter()
                    .map(|i| Self::from_json_depth(i, depth + 1))
                    .collect(),
            ),
            serde_json::Value::Object(map) => MetaValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json_depth(v, depth + 1)))
                    .collect(),
            ),
        }
    }

    /// Render as a plain string for comparisons and `match_reason` assembly.
    /// Lists/maps render as their JSON text; this is deliberately lossy, the
    /// way the source treats metadata values as loosely-typed scalars for
    /// the common case and falls back to stringification otherwise.
    pub fn display_string(&self) -> String {
        match self {
            MetaValue::Null => String::new(),
            MetaValue::Bool(b) => b.to_string(),
            MetaValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            MetaValue::String(s) => s.clone(),
            MetaValue::List(_) | MetaValue::Map(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// True for `Null`, matching the source's `stored value is nil` checks
    /// used when deciding whether to include a filter key in `match_reason`.
    pub fn is_null(&self) -> bool {
        matches!(self, MetaValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Number(n) => Some(*n),
            MetaValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

/// One unit of indexable content: a chunk id (`"<docid>::<local_id>"`), its
/// raw text, and its metadata map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub meta: BTreeMap<String, MetaValue>,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub chunk_id: String,
    pub score: f64,
    pub text: Option<String>,
    pub tenant: String,
    pub collection: String,
    pub meta: BTreeMap<String, MetaValue>,
    pub match_reason: String,
}

/// A single condition on one metadata field, as parsed from a client-supplied
/// filter value. Wildcards and comparators are always evaluated post-
/// retrieval; exact and negated values may be pushed into the engine's
/// SQL-like pre-filter (see `patchvec-store`'s query adapter).
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Bare `*`: always matches.
    Any,
    /// `*s*`: substring match.
    Contains(String),
    /// `*s`: suffix match.
    EndsWith(String),
    /// `s*`: prefix match.
    StartsWith(String),
    /// `!s`: string inequality.
    Negated(String),
    /// `OP v` for `OP in {>=, <=, !=, >, <}`.
    Comparator(ComparatorOp, String),
    /// Plain exact-equality value.
    Exact(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparatorOp {
    Ge,
    Le,
    Ne,
    Gt,
    Lt,
}

impl ComparatorOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparatorOp::Ge => ">=",
            ComparatorOp::Le => "<=",
            ComparatorOp::Ne => "!=",
            ComparatorOp::Gt => ">",
            ComparatorOp::Lt => "<",
        }
    }
}

impl FilterValue {
    /// Parse one raw filter value string into its grammar class. Order
    /// matters: longer/more specific operators (`>=`, `<=`, `!=`) must be
    /// tried before their single-character prefixes (`>`, `<`, `!`).
    pub fn parse(raw: &str) -> FilterValue {
        if raw == "*" {
            return FilterValue::Any;
        }
        if raw.len() >= 2 && raw.starts_with('*') && raw.ends_with('*') {
            return FilterValue::Contains(raw[1..raw.len() - 1].to_string());
        }
        if let Some(rest) = raw.strip_prefix('*') {
            return FilterValue::EndsWith(rest.to_string());
        }
        if let Some(rest) = raw.strip_suffix('*') {
            return FilterValue::StartsWith(rest.to_string());
        }
        for (prefix, op) in [
            (">=", ComparatorOp::Ge),
            ("<=", ComparatorOp::Le),
            ("!=", ComparatorOp::Ne),
            (">", ComparatorOp::Gt),
            ("<", ComparatorOp::Lt),
        ] {
            if let Some(rest) = raw.strip_prefix(prefix) {
                return FilterValue::Comparator(op, rest.trim().to_string());
            }
        }
        if let Some(rest) = raw.strip_prefix('!') {
            return FilterValue::Negated(rest.to_string());
        }
        FilterValue::Exact(raw.to_string())
    }

    /// Pre-filter values (exact, negated) can be pushed to the engine's
    /// SQL-like WHERE clause; everything else must be evaluated post-
    /// retrieval.
    pub fn is_pre_filterable(&self) -> bool {
        matches!(self, FilterValue::Exact(_) | FilterValue::Negated(_))
    }
}

/// A client-supplied filter: field name to one or more raw values (implicit
/// OR within a field, implicit AND across fields).
pub type RawFilters = BTreeMap<String, Vec<String>>;

/// Derive a default docid from a client-supplied filename, per the rule in
/// the data model: uppercase; replace space/dot/non-`[A-Z0-9_]` with `_`;
/// collapse runs of `_`; trim leading/trailing `_`; fall back to a random
/// id if the result is empty.
pub fn default_docid(filename: &str, random_suffix: &str) -> String {
    let upper = filename.to_uppercase();
    let mut out = String::with_capacity(upper.len());
    for c in upper.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    let collapsed = collapse_underscores(&out);
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        format!("PVDOC_{random_suffix}")
    } else {
        trimmed.to_string()
    }
}

fn collapse_underscores(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_underscore = false;
    for c in s.chars() {
        if c == '_' {
            if !prev_underscore {
                out.push(c);
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }
    out
}

/// Escape a chunk id into a filesystem-safe sidecar filename: `/ \ :` become
/// `_`, and `.txt` is appended.
pub fn chunk_id_to_filename(chunk_id: &str) -> String {
    let mut out = String::with_capacity(chunk_id.len() + 4);
    for c in chunk_id.chars() {
        match c {
            '/' | '\\' | ':' => out.push('_'),
            other => out.push(other),
        }
    }
    out.push_str(".txt");
    out
}
