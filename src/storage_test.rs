use super::*;

use serde::Deserialize;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Blob {
    name: String,
    count: u32,
}

// =============================================================================
// MemoryStorage
// =============================================================================

#[test]
fn memory_get_missing_is_none() {
    let storage = MemoryStorage::new();
    assert_eq!(storage.get_item("nope").unwrap(), None);
}

#[test]
fn memory_set_get_remove() {
    let storage = MemoryStorage::new();
    storage.set_item("k", "v").unwrap();
    assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));
    storage.remove_item("k").unwrap();
    assert_eq!(storage.get_item("k").unwrap(), None);
}

#[test]
fn memory_remove_missing_is_ok() {
    let storage = MemoryStorage::new();
    assert!(storage.remove_item("never-set").is_ok());
}

// =============================================================================
// JSON helpers
// =============================================================================

#[test]
fn save_then_load_json() {
    let storage = MemoryStorage::new();
    let blob = Blob { name: "rex".into(), count: 3 };
    save_json(&storage, "blob", &blob).unwrap();
    let loaded: Option<Blob> = load_json(&storage, "blob").unwrap();
    assert_eq!(loaded, Some(blob));
}

#[test]
fn load_json_missing_is_none() {
    let storage = MemoryStorage::new();
    let loaded: Option<Blob> = load_json(&storage, "blob").unwrap();
    assert!(loaded.is_none());
}

#[test]
fn load_json_corrupt_is_serialize_error() {
    let storage = MemoryStorage::new();
    storage.set_item("blob", "{not json").unwrap();
    let err = load_json::<Blob>(&storage, "blob").unwrap_err();
    assert!(matches!(err, StorageError::Serialize(_)));
}

// =============================================================================
// UnavailableStorage
// =============================================================================

#[test]
fn unavailable_storage_errors_on_every_call() {
    let storage = UnavailableStorage;
    assert!(matches!(storage.get_item("k"), Err(StorageError::Unavailable(_))));
    assert!(matches!(storage.set_item("k", "v"), Err(StorageError::Unavailable(_))));
    assert!(matches!(storage.remove_item("k"), Err(StorageError::Unavailable(_))));
}

// =============================================================================
// FileStorage
// =============================================================================

#[test]
fn file_storage_missing_file_reads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("store.json"));
    assert_eq!(storage.get_item("k").unwrap(), None);
}

#[test]
fn file_storage_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.json");

    let first = FileStorage::new(&path);
    first.set_item("auth-storage", "{\"a\":1}").unwrap();
    first.set_item("other", "x").unwrap();

    let second = FileStorage::new(&path);
    assert_eq!(second.get_item("auth-storage").unwrap().as_deref(), Some("{\"a\":1}"));
    second.remove_item("auth-storage").unwrap();

    let third = FileStorage::new(&path);
    assert_eq!(third.get_item("auth-storage").unwrap(), None);
    assert_eq!(third.get_item("other").unwrap().as_deref(), Some("x"));
}

#[test]
fn file_storage_corrupt_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, "garbage").unwrap();
    let storage = FileStorage::new(&path);
    assert!(storage.get_item("k").is_err());
}
