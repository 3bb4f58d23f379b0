//! Key-value persistence contract.
//!
//! The orchestrator keeps its conversation snapshot, its plan and each
//! sub-agent's memory in named string slots. Backends live in
//! `companion-store`.

use async_trait::async_trait;

use crate::error::StoreError;

/// A string-keyed store of string values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Read a slot. Missing keys return `Ok(None)`.
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;

    /// Overwrite a slot.
    async fn set(&self, key: &str, value: String) -> std::result::Result<(), StoreError>;

    /// Delete a slot. Returns whether it existed.
    async fn remove(&self, key: &str) -> std::result::Result<bool, StoreError>;
}
