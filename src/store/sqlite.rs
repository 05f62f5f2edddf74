use crate::bpv7::bundle::{decode, encode};
use crate::bpv7::{Bundle, EndpointId};
use crate::store::{BundlePack, BundleStore, Constraints, StoreError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Persistent backend over an embedded relational engine: `bundles(id PK,
/// data BLOB)` and `bundle_metadata(id PK, source, destination,
/// creation_time, size, constraints)` with `ON DELETE CASCADE` from
/// `bundle_metadata` to `bundles` (section 4.2). `push` writes both tables
/// inside one transaction.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS bundles (
                 id   TEXT PRIMARY KEY,
                 data BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS bundle_metadata (
                 id            TEXT PRIMARY KEY REFERENCES bundles(id) ON DELETE CASCADE,
                 source        TEXT NOT NULL,
                 destination   TEXT NOT NULL,
                 creation_time INTEGER NOT NULL,
                 size          INTEGER NOT NULL,
                 constraints   INTEGER NOT NULL
             );",
        )
        .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }

    fn row_to_pack(
        id: String,
        source: String,
        destination: String,
        creation_time: i64,
        size: i64,
        constraints: i64,
    ) -> BundlePack {
        BundlePack {
            id,
            source: EndpointId::from(&source),
            destination: EndpointId::from(&destination),
            creation_time_ms: creation_time as u64,
            size: size as u64,
            constraints: Constraints::from_bits_truncate(constraints as u8),
        }
    }
}

#[async_trait]
impl BundleStore for SqliteStore {
    async fn push(&self, bundle: &Bundle) -> Result<BundlePack, StoreError> {
        let bytes = encode(bundle).map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let id = bundle.id();
        let source = bundle.primary.source.description();
        let destination = bundle.primary.destination.description();
        let creation_time = bundle.primary.creation_timestamp.to_unix_ms() as i64;
        let size = bytes.len() as i64;

        let conn = self.conn.lock().unwrap();
        let existing_constraints: Option<i64> = conn
            .query_row(
                "SELECT constraints FROM bundle_metadata WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        tx.execute(
            "INSERT INTO bundles (id, data) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![id, bytes],
        )
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        let constraints = existing_constraints.unwrap_or(0);
        tx.execute(
            "INSERT INTO bundle_metadata (id, source, destination, creation_time, size, constraints)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET size = excluded.size",
            params![id, source, destination, creation_time, size, constraints],
        )
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        tx.commit()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(Self::row_to_pack(
            id,
            source,
            destination,
            creation_time,
            size,
            constraints,
        ))
    }

    async fn update_metadata(&self, pack: BundlePack) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE bundle_metadata SET source = ?2, destination = ?3,
                 creation_time = ?4, size = ?5, constraints = ?6 WHERE id = ?1",
                params![
                    pack.id,
                    pack.source.description(),
                    pack.destination.description(),
                    pack.creation_time_ms as i64,
                    pack.size as i64,
                    pack.constraints.bits() as i64,
                ],
            )
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        if updated == 0 {
            return Err(StoreError::BundleNotFound(pack.id));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE bundle_metadata SET constraints = constraints | ?2 WHERE id = ?1",
                params![id, Constraints::DELETED.bits() as i64],
            )
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        if updated == 0 {
            return Err(StoreError::BundleNotFound(id.to_string()));
        }
        conn.execute("DELETE FROM bundles WHERE id = ?1", params![id])
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        conn.execute("DELETE FROM bundle_metadata WHERE id = ?1", params![id])
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM bundle_metadata", [], |row| row.get(0))
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(count as u64)
    }

    async fn all_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id FROM bundle_metadata")
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(ids)
    }

    async fn all_bundles(&self) -> Result<Vec<BundlePack>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, source, destination, creation_time, size, constraints FROM bundle_metadata",
            )
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        let packs = stmt
            .query_map([], |row| {
                Ok(Self::row_to_pack(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?
            .collect::<Result<Vec<BundlePack>, _>>()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(packs)
    }

    async fn has_item(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM bundle_metadata WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(count > 0)
    }

    async fn get_bundle(&self, id: &str) -> Result<Option<Bundle>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let data: Option<Vec<u8>> = conn
            .query_row("SELECT data FROM bundles WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        match data {
            Some(bytes) => {
                let bundle = decode(&bytes).map_err(|e| StoreError::InvalidData(e.to_string()))?;
                Ok(Some(bundle))
            }
            None => Ok(None),
        }
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<BundlePack>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, source, destination, creation_time, size, constraints
             FROM bundle_metadata WHERE id = ?1",
            params![id],
            |row| {
                Ok(Self::row_to_pack(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    fn eid(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    #[tokio::test]
    async fn test_push_and_get_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let bundle = Bundle::new(eid("dtn://a"), eid("dtn://b"), b"hello".to_vec());
        let pack = store.push(&bundle).await.unwrap();
        assert_eq!(pack.id, bundle.id());
        let loaded = store.get_bundle(&bundle.id()).await.unwrap().unwrap();
        assert_eq!(loaded.payload(), b"hello");
    }

    #[tokio::test]
    async fn test_remove_cascades_to_bundle_bytes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let bundle = Bundle::new(eid("dtn://a"), eid("dtn://b"), vec![1]);
        store.push(&bundle).await.unwrap();
        store.remove(&bundle.id()).await.unwrap();
        assert!(store.get_bundle(&bundle.id()).await.unwrap().is_none());
        assert!(store.get_metadata(&bundle.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_twice_preserves_constraints() {
        let store = SqliteStore::open_in_memory().unwrap();
        let bundle = Bundle::new(eid("dtn://a"), eid("dtn://b"), b"v1".to_vec());
        let mut pack = store.push(&bundle).await.unwrap();
        pack.constraints |= Constraints::FORWARD_PENDING;
        store.update_metadata(pack).await.unwrap();

        let mut bundle2 = bundle.clone();
        bundle2.canonicals[0].data = b"v2".to_vec();
        let pack2 = store.push(&bundle2).await.unwrap();
        assert!(pack2.constraints.contains(Constraints::FORWARD_PENDING));
    }

    #[tokio::test]
    async fn test_count_and_all_ids() {
        let store = SqliteStore::open_in_memory().unwrap();
        let b1 = Bundle::with_lifetime(eid("dtn://a"), eid("dtn://b"), vec![], 3600, 1);
        let b2 = Bundle::with_lifetime(eid("dtn://a"), eid("dtn://b"), vec![], 3600, 2);
        store.push(&b1).await.unwrap();
        store.push(&b2).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.all_ids().await.unwrap().len(), 2);
    }
}
