use thiserror::Error;

/// Errors surfaced by the collection store. Names line up with the subset
/// of the service-level error taxonomy that originates here; the service
/// layer wraps these into its own typed envelope.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection not found: {tenant}/{collection}")]
    CollectionNotFound { tenant: String, collection: String },
    #[error("collection already exists: {tenant}/{collection}")]
    CollectionConflict { tenant: String, collection: String },
    #[error("invalid rename: {0}")]
    RenameInvalid(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine error: {0}")]
    Engine(#[from] patchvec_engine::EngineError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("embedder error: {0}")]
    Embed(#[from] patchvec_engine::EmbedderError),
}
