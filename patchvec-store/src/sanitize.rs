//! SQL-literal and field-name sanitization, grounded on `_sanit_sql`,
//! `_sanit_field`, `_sanit_meta_value`, `_sanit_meta_dict` in the source
//! store module. Both `sanit_sql` and `sanit_field` are idempotent:
//! `sanit_sql(sanit_sql(x)) == sanit_sql(x)`.

use std::collections::BTreeMap;

use patchvec_model::MetaValue;

/// Replace `; " \` \\ NUL` with a space (NUL is dropped outright), cut at
/// the first `--`, `/*`, or `*/` (SQL comment openers), trim, and optionally
/// truncate. The returned value is NOT quote-escaped — it still contains any
/// `'` from the input unchanged, so it stays stable under repeated
/// application. Callers splicing the result into a single-quoted literal
/// must escape quotes themselves at assembly time (see `sql_quote`).
pub fn sanit_sql(v: &str, max_len: Option<usize>) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            ';' | '"' | '`' | '\\' => out.push(' '),
            '\0' => {}
            other => out.push(other),
        }
    }

    let mut cut = out.len();
    for marker in ["--", "/*", "*/"] {
        if let Some(pos) = out.find(marker) {
            cut = cut.min(pos);
        }
    }
    out.truncate(cut);

    let trimmed = out.trim().to_string();
    let mut truncated = trimmed;
    if let Some(max) = max_len {
        if max > 0 && truncated.chars().count() > max {
            truncated = truncated.chars().take(max).collect();
        }
    }

    truncated
}

/// Double every `'` in an already-sanitized value, for splicing into a
/// single-quoted SQL literal. Kept separate from [`sanit_sql`] so that
/// function's output stays idempotent.
pub fn sql_quote(v: &str) -> String {
    v.replace('\'', "''")
}

/// Keep only ASCII alphanumerics, `_`, and `-`.
pub fn sanit_field(k: &str) -> String {
    k.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Recursively sanitize a metadata map: keys are run through [`sanit_field`]
/// (dropped if the result is empty), the `text` key is always dropped
/// (reserved for the chunk body sidecar), and nested maps/lists are
/// recursed into up to [`patchvec_model::MAX_FILTER_DEPTH`].
pub fn sanit_meta_dict(meta: &BTreeMap<String, MetaValue>) -> BTreeMap<String, MetaValue> {
    sanit_meta_dict_depth(meta, 0)
}

fn sanit_meta_dict_depth(meta: &BTreeMap<String, MetaValue>, depth: usize) -> BTreeMap<String, MetaValue> {
    let mut out = BTreeMap::new();
    if depth >= patchvec_model::MAX_FILTER_DEPTH {
        return out;
    }
    for (k, v) in meta {
        if k == "text" {
            continue;
        }
        let key = sanit_field(k);
        if key.is_empty() {
            continue;
        }
        out.insert(key, sanit_meta_value_depth(v, depth + 1));
    }
    out
}

fn sanit_meta_value_depth(v: &MetaValue, depth: usize) -> MetaValue {
    if depth >= patchvec_model::MAX_FILTER_DEPTH {
        return MetaValue::String(v.display_string());
    }
    match v {
        MetaValue::Map(m) => MetaValue::Map(sanit_meta_dict_depth(m, depth)),
        MetaValue::List(items) => {
            MetaValue::List(items.iter().map(|i| sanit_meta_value_depth(i, depth + 1)).collect())
        }
        other => other.clone(),
    }
}
