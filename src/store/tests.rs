use crate::bpv7::{Bundle, EndpointId};
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::{BundleStore, Constraints};

fn eid(s: &str) -> EndpointId {
    EndpointId::from(s)
}

async fn exercise_backend(store: &dyn BundleStore) {
    let bundle = Bundle::new(eid("dtn://node1"), eid("dtn://node2"), b"payload".to_vec());
    let id = bundle.id();

    let pack = store.push(&bundle).await.unwrap();
    assert_eq!(pack.id, id);
    assert!(store.has_item(&id).await.unwrap());
    assert_eq!(store.count().await.unwrap(), 1);

    let loaded = store.get_bundle(&id).await.unwrap().unwrap();
    assert_eq!(loaded.payload(), bundle.payload());

    let mut pack = store.get_metadata(&id).await.unwrap().unwrap();
    pack.constraints |= Constraints::DISPATCH_PENDING;
    store.update_metadata(pack).await.unwrap();
    let pack = store.get_metadata(&id).await.unwrap().unwrap();
    assert!(pack.constraints.contains(Constraints::DISPATCH_PENDING));

    store.remove(&id).await.unwrap();
    assert!(!store.has_item(&id).await.unwrap());
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.get_bundle(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_backend_full_lifecycle() {
    let store = MemoryStore::new();
    exercise_backend(&store).await;
}

#[tokio::test]
async fn test_sqlite_backend_full_lifecycle() {
    let store = SqliteStore::open_in_memory().unwrap();
    exercise_backend(&store).await;
}

#[tokio::test]
async fn test_sqlite_backend_persists_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("bundles.db");
    let bundle = Bundle::new(eid("dtn://a"), eid("dtn://b"), b"on-disk".to_vec());
    {
        let store = SqliteStore::open(&db_path).unwrap();
        store.push(&bundle).await.unwrap();
    }
    let store = SqliteStore::open(&db_path).unwrap();
    let loaded = store.get_bundle(&bundle.id()).await.unwrap().unwrap();
    assert_eq!(loaded.payload(), b"on-disk");
}

#[tokio::test]
async fn test_getting_absent_bundle_returns_none() {
    let store = MemoryStore::new();
    assert!(store.get_bundle("missing").await.unwrap().is_none());
    assert!(store.get_metadata("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_all_ids_reflects_only_live_bundles() {
    let store = MemoryStore::new();
    let b1 = Bundle::with_lifetime(eid("dtn://a"), eid("dtn://b"), vec![], 3600, 1);
    let b2 = Bundle::with_lifetime(eid("dtn://a"), eid("dtn://b"), vec![], 3600, 2);
    store.push(&b1).await.unwrap();
    store.push(&b2).await.unwrap();
    store.remove(&b1.id()).await.unwrap();
    let ids = store.all_ids().await.unwrap();
    assert_eq!(ids, vec![b2.id()]);
}
