//! ---
//! ring_section: "03-store"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Persistence abstractions for the registry."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
//! Store adapter used by the registry to persist member records and pushed
//! metric snapshots. The store is an abstract TTL-capable key-value surface;
//! the in-memory implementation backs the default deployment and every test.

use std::time::Duration;

use async_trait::async_trait;

pub mod keys;
pub mod memory;

pub use memory::MemoryStore;

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached; retriable by the caller.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored value failed to decode.
    #[error("corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// TTL-capable key-value store. Safe under concurrent access, with
/// read-your-writes visibility within a single process.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Set a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// All live `(key, value)` pairs whose key starts with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>>;
    /// Set several values in one call.
    async fn set_many(&self, entries: Vec<(String, String, Option<Duration>)>) -> Result<()>;
}
