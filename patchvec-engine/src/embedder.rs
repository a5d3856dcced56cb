//! Embedding capability. The real embedding backend is an external
//! collaborator (out of scope, per the engine non-goal); `DeterministicEmbedder`
//! is the in-process stand-in used to exercise and test everything above it,
//! the same role `DeterministicEmbedderCore` plays behind `OnnxHttpEmbedder`
//! in the teacher's embedding provider.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use thiserror::Error;

/// Static metadata describing a particular embedder instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderInfo {
    pub embedding_model_id: String,
    pub dimension: usize,
    pub text_repr_version: String,
}

/// Errors that can be produced by embedder operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmbedderError {
    #[error("invalid embedder configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("input text exceeds max length of {max_length} chars, actual length: {actual_length}")]
    InputTooLong {
        max_length: usize,
        actual_length: usize,
    },
    #[error("provider failure: {message}")]
    ProviderFailure { message: String },
}

/// Core interface for all embedder implementations.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;
    fn info(&self) -> &EmbedderInfo;
}

/// Deterministic, hash-seeded pseudo-embedding. Same text always yields the
/// same vector for a given `(model_id, text_repr_version)` pair; vectors
/// have no semantic content beyond equality/collision avoidance, which is
/// sufficient to exercise similarity search and filter logic in tests.
#[derive(Debug, Clone)]
pub struct DeterministicEmbedder {
    info: EmbedderInfo,
    max_input_length: usize,
    base_seed: u64,
}

impl DeterministicEmbedder {
    pub fn new(info: EmbedderInfo, max_input_length: usize) -> Result<Self, EmbedderError> {
        if info.dimension == 0 {
            return Err(EmbedderError::InvalidConfiguration {
                message: "dimension must be greater than zero".into(),
            });
        }
        if max_input_length == 0 {
            return Err(EmbedderError::InvalidConfiguration {
                message: "max_input_length must be greater than zero".into(),
            });
        }
        let base_seed = compute_seed(&info.embedding_model_id, &info.text_repr_version);
        Ok(Self {
            info,
            max_input_length,
            base_seed,
        })
    }

    fn validate_length(&self, text: &str) -> Result<(), EmbedderError> {
        let actual_length = text.chars().count();
        if actual_length > self.max_input_length {
            return Err(EmbedderError::InputTooLong {
                max_length: self.max_input_length,
                actual_length,
            });
        }
        Ok(())
    }

    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut output = Vec::with_capacity(self.info.dimension);
        for index in 0..self.info.dimension {
            let mut hasher = DefaultHasher::new();
            self.base_seed.hash(&mut hasher);
            index.hash(&mut hasher);
            text.hash(&mut hasher);
            output.push(normalize_hash(hasher.finish()));
        }
        output
    }
}

impl Embedder for DeterministicEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.validate_length(text)?;
        Ok(self.generate_embedding(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn info(&self) -> &EmbedderInfo {
        &self.info
    }
}

fn compute_seed(embedding_model_id: &str, text_repr_version: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    embedding_model_id.hash(&mut hasher);
    text_repr_version.hash(&mut hasher);
    hasher.finish()
}

fn normalize_hash(value: u64) -> f32 {
    const SCALE: f64 = 2.0;
    let normalized = (value as f64) / (u64::MAX as f64);
    (normalized * SCALE - 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> DeterministicEmbedder {
        DeterministicEmbedder::new(
            EmbedderInfo {
                embedding_model_id: "test-model".into(),
                dimension: 16,
                text_repr_version: "v1".into(),
            },
            4096,
        )
        .unwrap()
    }

    #[test]
    fn same_text_same_vector() {
        let e = embedder();
        assert_eq!(e.embed("hello").unwrap(), e.embed("hello").unwrap());
    }

    #[test]
    fn different_text_different_vector() {
        let e = embedder();
        assert_ne!(e.embed("hello").unwrap(), e.embed("goodbye").unwrap());
    }

    #[test]
    fn rejects_oversize_input() {
        let e = DeterministicEmbedder::new(
            EmbedderInfo {
                embedding_model_id: "test-model".into(),
                dimension: 4,
                text_repr_version: "v1".into(),
            },
            3,
        )
        .unwrap();
        assert!(matches!(
            e.embed("too long"),
            Err(EmbedderError::InputTooLong { .. })
        ));
    }
}
