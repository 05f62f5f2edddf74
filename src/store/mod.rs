//! Bundle store: persists encoded bundles plus their `BundlePack` metadata
//! and answers queries (section 4.2). Two backends share the same contract:
//! `memory` (hash tables) and `sqlite` (the embedded relational engine named
//! by the persistent-storage contract, two tables with FK cascade on delete).

pub mod memory;
pub mod pack;
pub mod sqlite;

pub use pack::{BundlePack, Constraints};

use crate::bpv7::Bundle;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bundle not found: {0}")]
    BundleNotFound(String),
    #[error("constraint violation for bundle {0}")]
    ConstraintViolation(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("database error: {0}")]
    DatabaseError(String),
}

/// Shared contract for bundle storage backends (section 4.2).
///
/// All mutations are serialized per store; readers may observe a consistent
/// snapshot. `push` is idempotent on `id`: the first call creates the
/// `BundlePack`, later calls with the same id replace the stored bytes but
/// never reset constraints (I-1).
#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn push(&self, bundle: &Bundle) -> Result<BundlePack, StoreError>;
    async fn update_metadata(&self, pack: BundlePack) -> Result<(), StoreError>;
    async fn remove(&self, id: &str) -> Result<(), StoreError>;
    async fn count(&self) -> Result<u64, StoreError>;
    async fn all_ids(&self) -> Result<Vec<String>, StoreError>;
    async fn all_bundles(&self) -> Result<Vec<BundlePack>, StoreError>;
    async fn has_item(&self, id: &str) -> Result<bool, StoreError>;
    async fn get_bundle(&self, id: &str) -> Result<Option<Bundle>, StoreError>;
    async fn get_metadata(&self, id: &str) -> Result<Option<BundlePack>, StoreError>;
}

#[cfg(test)]
mod tests;
