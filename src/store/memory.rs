use crate::bpv7::bundle::{decode, encode};
use crate::bpv7::Bundle;
use crate::store::{BundlePack, BundleStore, Constraints, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory backend: two hash tables guarded by a single lock, mirroring
/// the two-table relational contract without a file behind it.
pub struct MemoryStore {
    bundles: RwLock<HashMap<String, Vec<u8>>>,
    metadata: RwLock<HashMap<String, BundlePack>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            bundles: RwLock::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BundleStore for MemoryStore {
    async fn push(&self, bundle: &Bundle) -> Result<BundlePack, StoreError> {
        let bytes = encode(bundle).map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let id = bundle.id();
        let mut bundles = self.bundles.write().unwrap();
        let mut metadata = self.metadata.write().unwrap();
        bundles.insert(id.clone(), bytes.clone());
        let pack = metadata
            .entry(id)
            .or_insert_with(|| BundlePack::from_bundle(bundle, bytes.len() as u64));
        pack.size = bytes.len() as u64;
        Ok(pack.clone())
    }

    async fn update_metadata(&self, pack: BundlePack) -> Result<(), StoreError> {
        let mut metadata = self.metadata.write().unwrap();
        if !metadata.contains_key(&pack.id) {
            return Err(StoreError::BundleNotFound(pack.id));
        }
        metadata.insert(pack.id.clone(), pack);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut metadata = self.metadata.write().unwrap();
        match metadata.get_mut(id) {
            Some(pack) => pack.constraints |= Constraints::DELETED,
            None => return Err(StoreError::BundleNotFound(id.to_string())),
        }
        metadata.remove(id);
        self.bundles.write().unwrap().remove(id);
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.metadata.read().unwrap().len() as u64)
    }

    async fn all_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.metadata.read().unwrap().keys().cloned().collect())
    }

    async fn all_bundles(&self) -> Result<Vec<BundlePack>, StoreError> {
        Ok(self.metadata.read().unwrap().values().cloned().collect())
    }

    async fn has_item(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.metadata.read().unwrap().contains_key(id))
    }

    async fn get_bundle(&self, id: &str) -> Result<Option<Bundle>, StoreError> {
        let bundles = self.bundles.read().unwrap();
        match bundles.get(id) {
            Some(bytes) => {
                let bundle = decode(bytes).map_err(|e| StoreError::InvalidData(e.to_string()))?;
                Ok(Some(bundle))
            }
            None => Ok(None),
        }
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<BundlePack>, StoreError> {
        Ok(self.metadata.read().unwrap().get(id).cloned())
    }
}
