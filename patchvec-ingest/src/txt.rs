//! Plain-text chunker: lossy UTF-8 decode, fixed-size character windows with
//! overlap.

use patchvec_model::MetaValue;
use patchvec_store::IndexRecord;
use std::collections::BTreeMap;

pub const DEFAULT_SIZE: usize = 1000;
pub const DEFAULT_OVERLAP: usize = 200;

pub fn chunk_txt(bytes: &[u8], size: usize, overlap: usize) -> Vec<IndexRecord> {
    let text = String::from_utf8_lossy(bytes);
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = size.saturating_sub(overlap).max(1);
    let mut records = Vec::new();
    let mut start = 0usize;
    let mut n = 0usize;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let mut meta = BTreeMap::new();
        meta.insert("chunk".to_string(), MetaValue::Number(n as f64));
        records.push(IndexRecord {
            local_id: format!("chunk_{n}"),
            text: piece,
            meta,
        });
        n += 1;
        if end == chars.len() {
            break;
        }
        start += step;
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_with_overlap() {
        let text = "a".repeat(2500);
        let records = chunk_txt(text.as_bytes(), 1000, 200);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].local_id, "chunk_0");
        assert_eq!(records[0].text.chars().count(), 1000);
        assert_eq!(records[2].text.chars().count(), 2500 - 2 * 800);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_txt(b"", DEFAULT_SIZE, DEFAULT_OVERLAP).is_empty());
    }

    #[test]
    fn lossy_decode_does_not_panic_on_invalid_utf8() {
        let bytes = vec![0xff, 0xfe, b'h', b'i'];
        let records = chunk_txt(&bytes, DEFAULT_SIZE, DEFAULT_OVERLAP);
        assert_eq!(records.len(), 1);
        assert!(records[0].text.contains("hi"));
    }
}
