//! Saved addresses, file-backed at ~/.pinpoint/addresses.json.
//!
//! Ids are `addr-N`, handed out from a counter kept in the file. Writes go
//! to disk before the in-memory copy changes, so a failed write leaves the
//! store as it was.

use super::types::{AddressPatch, PersistenceError, SavedAddress};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Where confirmed addresses go.
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Insert a new address; the store assigns `id` and `created_at`.
    async fn create(&self, address: SavedAddress) -> Result<SavedAddress, PersistenceError>;
    async fn update(&self, id: &str, patch: AddressPatch) -> Result<SavedAddress, PersistenceError>;
    async fn delete(&self, id: &str) -> Result<(), PersistenceError>;
    /// A user's addresses, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<SavedAddress>, PersistenceError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    next_id: u64,
    /// Creation order.
    #[serde(default)]
    addresses: Vec<SavedAddress>,
}

pub struct JsonAddressStore {
    path: PathBuf,
    file: Mutex<StoreFile>,
}

impl JsonAddressStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn load_from(path: PathBuf) -> Result<Self, PersistenceError> {
        let file = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => StoreFile::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "address store opened");
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, StoreFile> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, file: &StoreFile) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Apply `change` to a copy, write it, then keep it.
    fn commit<T>(
        &self,
        change: impl FnOnce(&mut StoreFile) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = change(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.lock().addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AddressStore for JsonAddressStore {
    async fn create(&self, mut address: SavedAddress) -> Result<SavedAddress, PersistenceError> {
        if address.user_id.trim().is_empty() {
            return Err(PersistenceError::Rejected("user id is required".into()));
        }
        let saved = self.commit(|file| {
            file.next_id += 1;
            address.id = Some(format!("addr-{}", file.next_id));
            address.created_at = Some(Utc::now());
            file.addresses.push(address.clone());
            Ok(address)
        })?;
        info!(id = saved.id.as_deref().unwrap_or_default(), user = %saved.user_id, "address saved");
        Ok(saved)
    }

    async fn update(&self, id: &str, patch: AddressPatch) -> Result<SavedAddress, PersistenceError> {
        let saved = self.commit(|file| {
            let addr = file
                .addresses
                .iter_mut()
                .find(|a| a.id.as_deref() == Some(id))
                .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
            patch.apply(addr);
            Ok(addr.clone())
        })?;
        info!(id, "address updated");
        Ok(saved)
    }

    async fn delete(&self, id: &str) -> Result<(), PersistenceError> {
        self.commit(|file| {
            let before = file.addresses.len();
            file.addresses.retain(|a| a.id.as_deref() != Some(id));
            if file.addresses.len() == before {
                return Err(PersistenceError::NotFound(id.to_string()));
            }
            Ok(())
        })?;
        info!(id, "address deleted");
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SavedAddress>, PersistenceError> {
        Ok(self
            .lock()
            .addresses
            .iter()
            .rev()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Coordinate;
    use crate::location::types::AddressTag;
    use tempfile::TempDir;

    fn test_store() -> (JsonAddressStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("addresses.json");
        (JsonAddressStore::load_from(path).unwrap(), dir)
    }

    fn address(user: &str, house: &str) -> SavedAddress {
        SavedAddress {
            id: None,
            user_id: user.into(),
            tag: AddressTag::Home,
            house_or_flat: house.into(),
            area_or_road: "MG Road".into(),
            landmark: None,
            city: "Bengaluru".into(),
            state: "Karnataka".into(),
            grid_code: Some("7J4VXHCV+JR".into()),
            contact_name: "Asha".into(),
            contact_phone: "9876543210".into(),
            coordinate: Coordinate { latitude: 12.9756, longitude: 77.6066 },
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_timestamp() {
        let (store, _dir) = test_store();
        let saved = store.create(address("u1", "12")).await.unwrap();
        assert_eq!(saved.id.as_deref(), Some("addr-1"));
        assert!(saved.created_at.is_some());
        let second = store.create(address("u1", "14")).await.unwrap();
        assert_eq!(second.id.as_deref(), Some("addr-2"));
    }

    #[tokio::test]
    async fn test_list_newest_first_per_user() {
        let (store, _dir) = test_store();
        store.create(address("u1", "first")).await.unwrap();
        store.create(address("u2", "other")).await.unwrap();
        store.create(address("u1", "second")).await.unwrap();

        let list = store.list("u1").await.unwrap();
        let houses: Vec<&str> = list.iter().map(|a| a.house_or_flat.as_str()).collect();
        assert_eq!(houses, ["second", "first"]);
        assert!(store.list("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (store, _dir) = test_store();
        let saved = store.create(address("u1", "12")).await.unwrap();
        let id = saved.id.clone().unwrap();

        let patch = AddressPatch { house_or_flat: Some("12A".into()), ..Default::default() };
        let updated = store.update(&id, patch).await.unwrap();
        assert_eq!(updated.house_or_flat, "12A");
        assert_eq!(updated.created_at, saved.created_at);

        store.delete(&id).await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.delete(&id).await, Err(PersistenceError::NotFound(_))));
        assert!(matches!(
            store.update(&id, AddressPatch::default()).await,
            Err(PersistenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("addresses.json");
        {
            let store = JsonAddressStore::load_from(path.clone()).unwrap();
            store.create(address("u1", "12")).await.unwrap();
        }
        let store = JsonAddressStore::load_from(path).unwrap();
        assert_eq!(store.len(), 1);
        // The counter survives a reload.
        let next = store.create(address("u1", "13")).await.unwrap();
        assert_eq!(next.id.as_deref(), Some("addr-2"));
    }

    #[tokio::test]
    async fn test_rejects_missing_user() {
        let (store, _dir) = test_store();
        assert!(matches!(store.create(address(" ", "12")).await, Err(PersistenceError::Rejected(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes every write fail.
        let path = dir.path().join("addresses.json");
        fs::create_dir_all(&path).unwrap();
        let store = JsonAddressStore {
            path,
            file: Mutex::new(StoreFile::default()),
        };
        assert!(matches!(store.create(address("u1", "12")).await, Err(PersistenceError::Io(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("addresses.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonAddressStore::load_from(path),
            Err(PersistenceError::Serialization(_))
        ));
    }
}
