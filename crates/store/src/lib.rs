//! Key-value persistence backends for Companion.
//!
//! All backends implement the `companion_core::KeyValueStore` trait.
//! - `in_memory`: ephemeral, for tests and throwaway sessions
//! - `file_backend`: a single JSON object file, flushed on every write

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;

use companion_config::{StorageBackend, StorageConfig};
use companion_core::KeyValueStore;
use std::sync::Arc;

/// Open the backend selected in configuration.
pub fn open(config: &StorageConfig) -> Arc<dyn KeyValueStore> {
    match config.backend {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::File => Arc::new(FileStore::new(config.resolved_path())),
    }
}
