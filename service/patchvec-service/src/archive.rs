//! Dump/restore the entire `data_dir` as a ZIP archive. Both operations hold
//! every known collection lock for their duration; restore rejects
//! zip-slip-style member paths before anything is extracted.

use crate::error::ServiceError;
use patchvec_store::CollectionStore;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;

fn walk_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_files(root, &path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn write_zip(source_dir: &Path, target_path: &Path) -> Result<(), ServiceError> {
    if !source_dir.is_dir() {
        return Err(ServiceError::new("archive_dump_failed", format!("data directory not found: {}", source_dir.display())));
    }
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).map_err(|e| ServiceError::new("archive_dump_failed", e.to_string()))?;
    }

    let mut files = Vec::new();
    walk_files(source_dir, source_dir, &mut files).map_err(|e| ServiceError::new("archive_dump_failed", e.to_string()))?;

    let zip_file = fs::File::create(target_path).map_err(|e| ServiceError::new("archive_dump_failed", e.to_string()))?;
    let mut zf = zip::ZipWriter::new(zip_file);
    let options: FileOptions = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for file_path in &files {
        let rel = file_path.strip_prefix(source_dir).unwrap();
        let arcname = rel.to_string_lossy().replace('\\', "/");
        zf.start_file(arcname, options).map_err(|e| ServiceError::new("archive_dump_failed", e.to_string()))?;
        let mut f = fs::File::open(file_path).map_err(|e| ServiceError::new("archive_dump_failed", e.to_string()))?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).map_err(|e| ServiceError::new("archive_dump_failed", e.to_string()))?;
        zf.write_all(&buf).map_err(|e| ServiceError::new("archive_dump_failed", e.to_string()))?;
    }
    zf.finish().map_err(|e| ServiceError::new("archive_dump_failed", e.to_string()))?;
    Ok(())
}

fn validate_zip_members(zf: &mut zip::ZipArchive<fs::File>) -> Result<(), ServiceError> {
    for i in 0..zf.len() {
        let entry = zf.by_index(i).map_err(|e| ServiceError::new("archive_invalid", e.to_string()))?;
        let name = entry.name();
        if name.is_empty() {
            continue;
        }
        let rel = Path::new(name);
        if rel.is_absolute() || rel.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(ServiceError::new("archive_invalid", format!("invalid archive member: {name}")));
        }
        if name.starts_with('/') || name.starts_with('\\') {
            return Err(ServiceError::new("archive_invalid", format!("invalid archive member: {name}")));
        }
    }
    Ok(())
}

/// Create a ZIP of `data_dir` at `output_path`, holding every known
/// collection lock for the duration.
pub fn dump_archive(store: &CollectionStore, data_dir: &Path, output_path: &Path) -> Result<(), ServiceError> {
    store.with_all_locks(|| write_zip(data_dir, output_path))
}

/// Replace the contents of `data_dir` with the contents of `archive_bytes`,
/// holding every known collection lock for the duration. Rejects archives
/// with zip-slip-style member paths before touching disk.
pub fn restore_archive(store: &CollectionStore, data_dir: &Path, archive_bytes: &[u8]) -> Result<(), ServiceError> {
    fs::create_dir_all(data_dir).map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))?;

    let tmp_dir = tempfile::tempdir().map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))?;
    let archive_path = tmp_dir.path().join("patchvec-data.zip");
    let extract_dir = tmp_dir.path().join("extracted");
    fs::write(&archive_path, archive_bytes).map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))?;
    fs::create_dir_all(&extract_dir).map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))?;

    let zip_file = fs::File::open(&archive_path).map_err(|e| ServiceError::new("archive_invalid", e.to_string()))?;
    let mut zf = zip::ZipArchive::new(zip_file).map_err(|e| ServiceError::new("archive_invalid", e.to_string()))?;
    validate_zip_members(&mut zf)?;
    zf.extract(&extract_dir).map_err(|e| ServiceError::new("archive_invalid", e.to_string()))?;

    store.with_all_locks(|| -> Result<(), ServiceError> {
        for entry in fs::read_dir(data_dir).map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))? {
            let entry = entry.map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))?;
            } else {
                fs::remove_file(&path).map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))?;
            }
        }
        for entry in fs::read_dir(&extract_dir).map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))? {
            let entry = entry.map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))?;
            let dest = data_dir.join(entry.file_name());
            fs::rename(entry.path(), &dest).map_err(|e| ServiceError::new("archive_restore_failed", e.to_string()))?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchvec_engine::{DeterministicEmbedder, EmbedderInfo};
    use std::sync::Arc;

    fn store(dir: &Path) -> CollectionStore {
        let embedder = DeterministicEmbedder::new(
            EmbedderInfo { embedding_model_id: "test".into(), dimension: 8, text_repr_version: "v1".into() },
            10,
        )
        .unwrap();
        CollectionStore::new(dir, Arc::new(embedder))
    }

    #[test]
    fn dump_then_restore_round_trips_file_contents() {
        let data_dir = tempfile::tempdir().unwrap();
        let nested = data_dir.path().join("tenant/collection");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("doc.txt"), "hello endpoint").unwrap();

        let store1 = store(data_dir.path());
        let archive_dir = tempfile::tempdir().unwrap();
        let archive_path = archive_dir.path().join("dump.zip");
        dump_archive(&store1, data_dir.path(), &archive_path).unwrap();

        fs::remove_dir_all(data_dir.path()).unwrap();
        fs::create_dir_all(data_dir.path()).unwrap();

        let bytes = fs::read(&archive_path).unwrap();
        let store2 = store(data_dir.path());
        restore_archive(&store2, data_dir.path(), &bytes).unwrap();

        let restored = fs::read_to_string(data_dir.path().join("tenant/collection/doc.txt")).unwrap();
        assert_eq!(restored, "hello endpoint");
    }

    #[test]
    fn restore_rejects_zip_slip_member() {
        let data_dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(data_dir.path()).unwrap();

        let zip_path = tempfile::tempdir().unwrap().path().join("evil.zip");
        fs::create_dir_all(zip_path.parent().unwrap()).unwrap();
        let file = fs::File::create(&zip_path).unwrap();
        let mut zf = zip::ZipWriter::new(file);
        let options: FileOptions = FileOptions::default();
        zf.start_file("../escape.txt", options).unwrap();
        zf.write_all(b"pwned").unwrap();
        zf.finish().unwrap();

        let bytes = fs::read(&zip_path).unwrap();
        let store = store(data_dir.path());
        let err = restore_archive(&store, data_dir.path(), &bytes).unwrap_err();
        assert_eq!(err.code, "archive_invalid");
    }
}
