//! The collection store: per-(tenant, collection) embedding index plus
//! sidecar state, its concurrency discipline, and the query engine adapter
//! that sits in front of it.

pub mod adapter;
pub mod atomic;
pub mod collection;
pub mod error;
pub mod locks;
pub mod paths;
pub mod sanitize;

pub use collection::{CollectionStore, IndexRecord};
pub use error::StoreError;
