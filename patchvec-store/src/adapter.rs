//! Query engine adapter: filter splitting, SQL-like assembly, post-filter
//! evaluation, and match-reason assembly. Grounded line-by-line on
//! `_split_filters`, `_build_sql`, `_matches_filters`, `_build_match_reason`
//! in the source store module.

use std::collections::BTreeMap;

use patchvec_model::{ComparatorOp, FilterValue, MetaValue, RawFilters, MAX_FILTER_DEPTH};

use crate::sanitize::{sanit_field, sanit_sql, sql_quote};

/// Default `vector_store.max_query_chars`; `0` disables truncation.
pub const DEFAULT_MAX_QUERY_CHARS: usize = 512;

/// A client filter split into the engine-pushable pre-filter (by sanitized
/// field name) and the post-retrieval filter (by sanitized field name).
/// Keys that sanitize to empty are dropped entirely.
pub struct SplitFilters {
    pub pre: BTreeMap<String, Vec<FilterValue>>,
    pub post: BTreeMap<String, Vec<FilterValue>>,
}

pub fn split_filters(raw: &RawFilters) -> SplitFilters {
    let mut pre: BTreeMap<String, Vec<FilterValue>> = BTreeMap::new();
    let mut post: BTreeMap<String, Vec<FilterValue>> = BTreeMap::new();
    for (field, values) in raw {
        let key = sanit_field(field);
        if key.is_empty() {
            continue;
        }
        for raw_value in values {
            let parsed = FilterValue::parse(raw_value);
            if parsed.is_pre_filterable() {
                pre.entry(key.clone()).or_default().push(parsed);
            } else {
                post.entry(key.clone()).or_default().push(parsed);
            }
        }
    }
    SplitFilters { pre, post }
}

/// Build the conceptual SQL-like query text the adapter would submit to a
/// real engine. Carried for ops-log/debug parity; the reference engine
/// executes the structured pre-filter directly (see `patchvec-engine`).
pub fn build_sql(
    query: &str,
    pre: &BTreeMap<String, Vec<FilterValue>>,
    fetch_k: usize,
    max_query_chars: usize,
) -> String {
    let max = if max_query_chars == 0 {
        None
    } else {
        Some(max_query_chars)
    };
    let sanitized_query = sql_quote(&sanit_sql(query, max));

    let mut clauses = Vec::new();
    for (field, values) in pre {
        let mut terms = Vec::new();
        for v in values {
            match v {
                FilterValue::Exact(s) => terms.push(format!("[{field}] = '{}'", sql_quote(&sanit_sql(s, None)))),
                FilterValue::Negated(s) => terms.push(format!("[{field}] <> '{}'", sql_quote(&sanit_sql(s, None)))),
                _ => {}
            }
        }
        if !terms.is_empty() {
            clauses.push(format!("({})", terms.join(" OR ")));
        }
    }

    let mut sql = format!("SELECT * FROM index_table WHERE similar('{sanitized_query}')");
    for clause in &clauses {
        sql.push_str(" AND ");
        sql.push_str(clause);
    }
    sql.push_str(" AND id <> '' GROUP BY id LIMIT ");
    sql.push_str(&fetch_k.to_string());
    sql
}

/// Does `meta` satisfy every post-filter field (AND across fields, OR
/// within a field's conditions)? Recursion bounded by [`MAX_FILTER_DEPTH`].
pub fn matches_filters(meta: &BTreeMap<String, MetaValue>, post: &BTreeMap<String, Vec<FilterValue>>) -> bool {
    post.iter().all(|(field, conds)| {
        let stored = meta.get(field);
        conds.iter().any(|cond| match_value(stored, cond, 0))
    })
}

fn match_value(stored: Option<&MetaValue>, cond: &FilterValue, depth: usize) -> bool {
    if depth >= MAX_FILTER_DEPTH {
        return false;
    }
    if let Some(MetaValue::List(items)) = stored {
        return items.iter().any(|item| match_value(Some(item), cond, depth + 1));
    }
    match cond {
        FilterValue::Any => true,
        FilterValue::Contains(s) => stored.map(|v| v.display_string().contains(s)).unwrap_or(false),
        FilterValue::EndsWith(s) => stored.map(|v| v.display_string().ends_with(s)).unwrap_or(false),
        FilterValue::StartsWith(s) => stored.map(|v| v.display_string().starts_with(s)).unwrap_or(false),
        FilterValue::Negated(s) => stored.map(|v| v.display_string() != *s).unwrap_or(true),
        FilterValue::Comparator(op, s) => compare(stored, *op, s),
        FilterValue::Exact(s) => stored.map(|v| v.display_string() == *s).unwrap_or(false),
    }
}

fn compare(stored: Option<&MetaValue>, op: ComparatorOp, rhs: &str) -> bool {
    let Some(stored) = stored else { return false };
    if let (Some(a), Ok(b)) = (stored.as_f64(), rhs.trim().parse::<f64>()) {
        return apply_ord(a.partial_cmp(&b), op);
    }
    if let (Ok(a), Ok(b)) = (
        chrono::DateTime::parse_from_rfc3339(&stored.display_string()),
        chrono::DateTime::parse_from_rfc3339(rhs),
    ) {
        return apply_ord(a.partial_cmp(&b), op);
    }
    false
}

fn apply_ord(ord: Option<std::cmp::Ordering>, op: ComparatorOp) -> bool {
    use std::cmp::Ordering::*;
    match (ord, op) {
        (Some(Greater), ComparatorOp::Ge | ComparatorOp::Gt) => true,
        (Some(Equal), ComparatorOp::Ge | ComparatorOp::Le) => true,
        (Some(Less), ComparatorOp::Le | ComparatorOp::Lt) => true,
        (Some(Equal), ComparatorOp::Ne) => false,
        (Some(_), ComparatorOp::Ne) => true,
        _ => false,
    }
}

/// `"semantic similarity <floor(score*100)>%"` (when the query is
/// non-empty) plus `"filters: k1=v1, k2=v2, …"` for every filter key whose
/// stored value is non-null, joined by `"; "`. Falls back to `"matched"`
/// when both parts are empty.
pub fn build_match_reason(query: &str, score: f64, raw_filters: &RawFilters, meta: &BTreeMap<String, MetaValue>) -> String {
    let mut parts = Vec::new();
    if !query.trim().is_empty() {
        parts.push(format!("semantic similarity {}%", (score * 100.0).floor() as i64));
    }
    let mut filter_parts = Vec::new();
    for field in raw_filters.keys() {
        let key = sanit_field(field);
        if key.is_empty() {
            continue;
        }
        if let Some(v) = meta.get(&key) {
            if !v.is_null() {
                filter_parts.push(format!("{key}={}", v.display_string()));
            }
        }
    }
    if !filter_parts.is_empty() {
        parts.push(format!("filters: {}", filter_parts.join(", ")));
    }
    if parts.is_empty() {
        "matched".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(pairs: &[(&str, &str)]) -> RawFilters {
        let mut m = RawFilters::new();
        for (k, v) in pairs {
            m.entry(k.to_string()).or_default().push(v.to_string());
        }
        m
    }

    #[test]
    fn split_separates_exact_from_wildcard() {
        let raw = filters(&[("name", "foo*"), ("docid", "X"), ("size", ">100")]);
        let split = split_filters(&raw);
        assert!(split.pre.contains_key("docid"));
        assert!(split.post.contains_key("name"));
        assert!(split.post.contains_key("size"));
    }

    #[test]
    fn wildcard_matching_s4_scenario() {
        let rows = [
            ("foobar", 50.0),
            ("fooqux", 150.0),
            ("bazbar", 250.0),
            ("zulu", 5.0),
        ];
        let raw = filters(&[("name", "foo*"), ("name", "*bar"), ("size", ">100")]);
        let split = split_filters(&raw);
        let kept: Vec<&str> = rows
            .iter()
            .filter(|(name, size)| {
                let mut meta = BTreeMap::new();
                meta.insert("name".to_string(), MetaValue::String(name.to_string()));
                meta.insert("size".to_string(), MetaValue::Number(*size));
                matches_filters(&meta, &split.post)
            })
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(kept, vec!["fooqux", "bazbar"]);
    }

    #[test]
    fn match_reason_falls_back_to_matched() {
        let meta = BTreeMap::new();
        let raw = RawFilters::new();
        assert_eq!(build_match_reason("", 0.0, &raw, &meta), "matched");
    }

    #[test]
    fn match_reason_includes_similarity_and_filters() {
        let mut meta = BTreeMap::new();
        meta.insert("docid".to_string(), MetaValue::String("R-42".into()));
        let raw = filters(&[("docid", "R-42")]);
        let reason = build_match_reason("hello", 0.873, &raw, &meta);
        assert_eq!(reason, "semantic similarity 87%; filters: docid=R-42");
    }
}
