//! CSV chunker: UTF-8-then-Latin-1 decode, delimiter/header sniffing, column
//! spec resolution, one chunk per row.

use crate::error::IngestError;
use encoding_rs::WINDOWS_1252;
use patchvec_model::MetaValue;
use patchvec_store::IndexRecord;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    Auto,
    Yes,
    No,
}

impl HeaderMode {
    pub fn parse(raw: &str) -> HeaderMode {
        match raw.to_lowercase().as_str() {
            "yes" => HeaderMode::Yes,
            "no" => HeaderMode::No,
            _ => HeaderMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CsvOptions {
    pub has_header: Option<String>,
    pub meta_cols: Option<String>,
    pub include_cols: Option<String>,
}

/// Decode bytes as UTF-8, falling back to a Latin-1-compatible (Windows-1252)
/// decode when the input is not valid UTF-8.
fn decode_csv_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// Sniff the field delimiter among a small candidate set by picking the one
/// whose field count is most consistent across the sample's lines.
fn sniff_delimiter(sample: &str) -> u8 {
    let candidates: [u8; 4] = [b',', b';', b'\t', b'|'];
    let lines: Vec<&str> = sample.lines().take(10).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0i64;
    for &delim in &candidates {
        let counts: Vec<usize> = lines.iter().map(|l| l.matches(delim as char).count()).collect();
        if counts.iter().all(|&c| c == 0) {
            continue;
        }
        let first = counts[0];
        let consistent = counts.iter().filter(|&&c| c == first).count() as i64;
        let score = consistent * 10 + first as i64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }
    best
}

/// Heuristic header sniff: a column is header-like if its first-row value
/// fails to parse as a number while the same column parses as a number in a
/// later row. Any such column tips the verdict towards "has header".
fn sniff_has_header(first: &[String], rest: &[Vec<String>]) -> bool {
    if rest.is_empty() {
        return false;
    }
    for (i, head_cell) in first.iter().enumerate() {
        let head_is_numeric = head_cell.trim().parse::<f64>().is_ok();
        if head_is_numeric {
            continue;
        }
        let other_numeric = rest
            .iter()
            .filter_map(|row| row.get(i))
            .any(|v| v.trim().parse::<f64>().is_ok());
        if other_numeric {
            return true;
        }
    }
    false
}

fn parse_col_spec(spec: &str) -> Result<(Vec<String>, Vec<usize>), IngestError> {
    let mut names = Vec::new();
    let mut idxs = Vec::new();
    for tok in spec.split(',').map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if tok.chars().all(|c| c.is_ascii_digit()) {
            let i: i64 = tok.parse().unwrap();
            if i <= 0 {
                return Err(IngestError::InvalidCsvOptions(
                    "CSV column indices are 1-based".to_string(),
                ));
            }
            idxs.push((i - 1) as usize);
        } else {
            names.push(tok.to_string());
        }
    }
    Ok((names, idxs))
}

fn resolve_cols(
    names: &[String],
    idxs: &[usize],
    cols: &[String],
) -> Result<Vec<String>, IngestError> {
    let mut out = Vec::new();
    for nm in names {
        if !cols.contains(nm) {
            return Err(IngestError::InvalidCsvOptions(format!(
                "CSV column '{nm}' not found in header"
            )));
        }
        out.push(nm.clone());
    }
    for &i in idxs {
        if i >= cols.len() {
            return Err(IngestError::InvalidCsvOptions(format!(
                "CSV column index {} out of range (1..{})",
                i + 1,
                cols.len()
            )));
        }
        out.push(cols[i].clone());
    }
    let mut seen = std::collections::HashSet::new();
    out.retain(|k| seen.insert(k.clone()));
    Ok(out)
}

fn stringify_row(row: &BTreeMap<String, String>, keys: &[String]) -> String {
    keys.iter()
        .map(|k| format!("{k}: {}", row.get(k).map(String::as_str).unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Largest byte offset `<= len.min(text.len())` that lands on a UTF-8
/// character boundary, so slicing a decoded string for sniffing never
/// panics on a multibyte character straddling the cut point.
fn floor_char_boundary(text: &str, len: usize) -> usize {
    let mut idx = len.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

pub fn chunk_csv(bytes: &[u8], options: &CsvOptions) -> Result<Vec<IndexRecord>, IngestError> {
    let text = decode_csv_bytes(bytes);
    let sample = &text[..floor_char_boundary(&text, 4096)];
    let delimiter = sniff_delimiter(sample);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut all_rows: Vec<Vec<String>> = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| IngestError::InvalidCsvOptions(e.to_string()))?;
        all_rows.push(record.iter().map(str::to_string).collect());
    }
    let Some(first) = all_rows.first().cloned() else {
        return Ok(Vec::new());
    };

    let mode = HeaderMode::parse(options.has_header.as_deref().unwrap_or("auto"));
    let header_row: Option<Vec<String>> = match mode {
        HeaderMode::Yes => Some(first.iter().map(|h| h.trim().to_string()).collect()),
        HeaderMode::No => None,
        HeaderMode::Auto => {
            let rest = &all_rows[1..];
            if sniff_has_header(&first, rest) {
                Some(first.iter().map(|h| h.trim().to_string()).collect())
            } else {
                None
            }
        }
    };

    let (cols, data_rows): (Vec<String>, &[Vec<String>]) = match &header_row {
        Some(h) => (h.clone(), &all_rows[1..]),
        None => {
            let ncols = first.len();
            let synthesized = (0..ncols).map(|i| format!("col_{i}")).collect();
            (synthesized, &all_rows[..])
        }
    };
    let ncols = cols.len();

    let meta_spec = options.meta_cols.as_deref().unwrap_or("");
    let inc_spec = options.include_cols.as_deref().unwrap_or("");
    let (meta_names, meta_idxs) = parse_col_spec(meta_spec)?;
    let (inc_names, inc_idxs) = parse_col_spec(inc_spec)?;

    if (!meta_names.is_empty() || !inc_names.is_empty()) && header_row.is_none() {
        return Err(IngestError::InvalidCsvOptions(
            "CSV has no header but column names were provided. Use 1-based indices or supply a header.".to_string(),
        ));
    }

    let meta_keys = resolve_cols(&meta_names, &meta_idxs, &cols)?;
    let include_keys = if !inc_names.is_empty() || !inc_idxs.is_empty() {
        resolve_cols(&inc_names, &inc_idxs, &cols)?
    } else {
        let meta_set: std::collections::HashSet<&String> = meta_keys.iter().collect();
        cols.iter().filter(|c| !meta_set.contains(c)).cloned().collect()
    };

    let mut records = Vec::with_capacity(data_rows.len());
    for (rowno0, row) in data_rows.iter().enumerate() {
        let mut padded = row.clone();
        padded.resize(ncols, String::new());
        padded.truncate(ncols);
        let asdict: BTreeMap<String, String> = cols
            .iter()
            .cloned()
            .zip(padded.iter().cloned())
            .collect();

        let text_part = stringify_row(&asdict, &include_keys);
        let mut meta = BTreeMap::new();
        for k in &meta_keys {
            meta.insert(
                k.clone(),
                MetaValue::String(asdict.get(k).cloned().unwrap_or_default()),
            );
        }
        meta.insert("row".to_string(), MetaValue::Number((rowno0 + 1) as f64));
        meta.insert("has_header".to_string(), MetaValue::Bool(header_row.is_some()));

        records.push(IndexRecord {
            local_id: format!("row_{rowno0}"),
            text: text_part,
            meta,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_auto_detected_and_default_include_excludes_meta() {
        let csv = "name,age,city\nalice,30,ny\nbob,40,la\n";
        let options = CsvOptions {
            has_header: None,
            meta_cols: Some("city".to_string()),
            include_cols: None,
        };
        let records = chunk_csv(csv.as_bytes(), &options).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].local_id, "row_0");
        assert!(records[0].text.contains("name: alice"));
        assert!(!records[0].text.contains("city:"));
        assert_eq!(
            records[0].meta.get("city"),
            Some(&MetaValue::String("ny".to_string()))
        );
        assert_eq!(records[0].meta.get("row"), Some(&MetaValue::Number(1.0)));
    }

    #[test]
    fn no_header_uses_synthesized_column_names() {
        let csv = "1,2,3\n4,5,6\n";
        let options = CsvOptions {
            has_header: Some("no".to_string()),
            meta_cols: None,
            include_cols: None,
        };
        let records = chunk_csv(csv.as_bytes(), &options).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].text.contains("col_0: 1"));
        assert_eq!(
            records[0].meta.get("has_header"),
            Some(&MetaValue::Bool(false))
        );
    }

    #[test]
    fn naming_columns_without_header_is_a_client_error() {
        let csv = "1,2,3\n4,5,6\n";
        let options = CsvOptions {
            has_header: Some("no".to_string()),
            meta_cols: Some("foo".to_string()),
            include_cols: None,
        };
        let err = chunk_csv(csv.as_bytes(), &options).unwrap_err();
        assert!(matches!(err, IngestError::InvalidCsvOptions(_)));
    }

    #[test]
    fn one_based_index_column_spec() {
        let csv = "a,b,c\n1,2,3\n";
        let options = CsvOptions {
            has_header: Some("yes".to_string()),
            meta_cols: None,
            include_cols: Some("2".to_string()),
        };
        let records = chunk_csv(csv.as_bytes(), &options).unwrap();
        assert_eq!(records[0].text, "b: 2");
    }

    #[test]
    fn zero_index_is_rejected() {
        let csv = "a,b\n1,2\n";
        let options = CsvOptions {
            has_header: Some("yes".to_string()),
            meta_cols: None,
            include_cols: Some("0".to_string()),
        };
        let err = chunk_csv(csv.as_bytes(), &options).unwrap_err();
        assert!(matches!(err, IngestError::InvalidCsvOptions(_)));
    }

    #[test]
    fn semicolon_delimiter_is_sniffed() {
        let csv = "name;age\nalice;30\nbob;40\n";
        let options = CsvOptions::default();
        let records = chunk_csv(csv.as_bytes(), &options).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].text.contains("name: alice"));
    }
}
