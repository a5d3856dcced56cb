use std::path::{Path, PathBuf};

use patchvec_model::{chunk_id_to_filename, CollectionId, TenantId};

/// `<data_dir>/t_<tenant>/c_<collection>/`
pub fn collection_dir(data_dir: &Path, tenant: &TenantId, collection: &CollectionId) -> PathBuf {
    tenant_dir(data_dir, tenant).join(format!("c_{}", collection.as_str()))
}

/// `<data_dir>/t_<tenant>/`
pub fn tenant_dir(data_dir: &Path, tenant: &TenantId) -> PathBuf {
    data_dir.join(format!("t_{}", tenant.as_str()))
}

pub fn index_dir(collection_dir: &Path) -> PathBuf {
    collection_dir.join("index")
}

pub fn index_marker(collection_dir: &Path) -> PathBuf {
    index_dir(collection_dir).join("embeddings")
}

pub fn catalog_path(collection_dir: &Path) -> PathBuf {
    collection_dir.join("catalog.json")
}

pub fn meta_path(collection_dir: &Path) -> PathBuf {
    collection_dir.join("meta.json")
}

pub fn chunks_dir(collection_dir: &Path) -> PathBuf {
    collection_dir.join("chunks")
}

pub fn chunk_sidecar_path(collection_dir: &Path, chunk_id: &str) -> PathBuf {
    chunks_dir(collection_dir).join(chunk_id_to_filename(chunk_id))
}
