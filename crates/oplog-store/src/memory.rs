//! In-process object store
//!
//! Implements the full collaborator contract against a process-local map.
//! Lease expiry is wall-clock and evaluated lazily: an expired lease is
//! treated as absent the next time anyone tries to acquire or release one.

use crate::object_store::ObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use oplog_common::{Error, HolderId, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Lease {
    lock_id: String,
    holder: HolderId,
    expires_at: Instant,
}

impl Lease {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn is_held_by(&self, lock_id: &str, holder: &HolderId) -> bool {
        self.lock_id == lock_id && self.holder == *holder
    }
}

#[derive(Debug, Default)]
struct ObjectState {
    header: Bytes,
    content: Vec<u8>,
    lease: Option<Lease>,
}

/// Process-local [`ObjectStore`] implementation.
///
/// All operations take one lock over the object map, which makes each of
/// them atomic with respect to every other — the same guarantee the trait
/// assumes from a real storage fabric.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, ObjectState>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all live objects, in lexical order
    #[must_use]
    pub fn object_names(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// The holder of the live lease on `name`, if any
    #[must_use]
    pub fn lease_holder(&self, name: &str) -> Option<HolderId> {
        let objects = self.objects.lock();
        let lease = objects.get(name)?.lease.as_ref()?;
        if lease.is_expired() {
            None
        } else {
            Some(lease.holder.clone())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create(&self, name: &str, exclusive: bool) -> Result<()> {
        let mut objects = self.objects.lock();
        if objects.contains_key(name) {
            if exclusive {
                return Err(Error::ObjectExists(name.to_string()));
            }
            return Ok(());
        }
        objects.insert(name.to_string(), ObjectState::default());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let mut objects = self.objects.lock();
        objects
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.lock().contains_key(name))
    }

    async fn read_header(&self, name: &str) -> Result<Bytes> {
        let objects = self.objects.lock();
        let object = objects
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(object.header.clone())
    }

    async fn compare_and_swap_header(&self, name: &str, expected: &[u8], new: &[u8]) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if object.header.as_ref() != expected {
            return Err(Error::StaleSequence);
        }
        object.header = Bytes::copy_from_slice(new);
        Ok(())
    }

    async fn append(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        object.content.extend_from_slice(data);
        Ok(())
    }

    async fn read_all(&self, name: &str) -> Result<Bytes> {
        let objects = self.objects.lock();
        let object = objects
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(Bytes::copy_from_slice(&object.content))
    }

    async fn lock_exclusive(
        &self,
        name: &str,
        lock_id: &str,
        holder: &HolderId,
        duration: Duration,
    ) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        if let Some(lease) = &object.lease
            && !lease.is_expired()
            && !lease.is_held_by(lock_id, holder)
        {
            return Err(Error::LeaseHeld {
                object: name.to_string(),
            });
        }

        object.lease = Some(Lease {
            lock_id: lock_id.to_string(),
            holder: holder.clone(),
            expires_at: Instant::now() + duration,
        });
        Ok(())
    }

    async fn unlock(&self, name: &str, lock_id: &str, holder: &HolderId) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        match &object.lease {
            Some(lease) if lease.is_expired() => {
                object.lease = None;
                Ok(())
            }
            Some(lease) if lease.is_held_by(lock_id, holder) => {
                object.lease = None;
                Ok(())
            }
            Some(_) => Err(Error::LeaseHeld {
                object: name.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = "journal";

    #[tokio::test]
    async fn test_exclusive_create() {
        let store = MemoryStore::new();
        store.create("obj", true).await.unwrap();

        // Second exclusive create loses
        let err = store.create("obj", true).await.unwrap_err();
        assert!(matches!(err, Error::ObjectExists(_)));

        // Non-exclusive create tolerates an existing object
        store.create("obj", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_cas_stale_write_not_applied() {
        let store = MemoryStore::new();
        store.create("seq", false).await.unwrap();
        store
            .compare_and_swap_header("seq", b"", b"v1")
            .await
            .unwrap();

        // Stale expectation: must fail and leave the stored value alone
        let err = store
            .compare_and_swap_header("seq", b"v0", b"v2")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleSequence));
        assert_eq!(store.read_header("seq").await.unwrap().as_ref(), b"v1");

        // Fresh expectation applies
        store
            .compare_and_swap_header("seq", b"v1", b"v2")
            .await
            .unwrap();
        assert_eq!(store.read_header("seq").await.unwrap().as_ref(), b"v2");
    }

    #[tokio::test]
    async fn test_append_and_read_all() {
        let store = MemoryStore::new();
        store.create("entry", true).await.unwrap();
        store.append("entry", b"abc").await.unwrap();
        store.append("entry", b"def").await.unwrap();
        assert_eq!(store.read_all("entry").await.unwrap().as_ref(), b"abcdef");
    }

    #[tokio::test]
    async fn test_lease_mutual_exclusion() {
        let store = MemoryStore::new();
        store.create("entry", true).await.unwrap();

        let writer = HolderId::writer();
        let reader = HolderId::reader();
        let hour = Duration::from_secs(3600);

        store
            .lock_exclusive("entry", LOCK, &writer, hour)
            .await
            .unwrap();

        // A second holder is refused while the lease is live
        let err = store
            .lock_exclusive("entry", LOCK, &reader, hour)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LeaseHeld { .. }));
        assert_eq!(store.lease_holder("entry"), Some(writer.clone()));

        // The holder itself can renew
        store
            .lock_exclusive("entry", LOCK, &writer, hour)
            .await
            .unwrap();

        // After release the other holder acquires
        store.unlock("entry", LOCK, &writer).await.unwrap();
        store
            .lock_exclusive("entry", LOCK, &reader, hour)
            .await
            .unwrap();
        assert_eq!(store.lease_holder("entry"), Some(reader));
    }

    #[tokio::test]
    async fn test_lease_expires() {
        let store = MemoryStore::new();
        store.create("entry", true).await.unwrap();

        let writer = HolderId::writer();
        let reader = HolderId::reader();

        store
            .lock_exclusive("entry", LOCK, &writer, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(
            store
                .lock_exclusive("entry", LOCK, &reader, Duration::from_secs(3600))
                .await
                .is_err()
        );

        tokio::time::sleep(Duration::from_millis(40)).await;

        // Expired lease no longer blocks acquisition
        store
            .lock_exclusive("entry", LOCK, &reader, Duration::from_secs(3600))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unlock_foreign_lease_refused() {
        let store = MemoryStore::new();
        store.create("entry", true).await.unwrap();

        let writer = HolderId::writer();
        let reader = HolderId::reader();
        store
            .lock_exclusive("entry", LOCK, &writer, Duration::from_secs(3600))
            .await
            .unwrap();

        let err = store.unlock("entry", LOCK, &reader).await.unwrap_err();
        assert!(matches!(err, Error::LeaseHeld { .. }));

        // Releasing an absent lease is fine
        store.unlock("entry", LOCK, &writer).await.unwrap();
        store.unlock("entry", LOCK, &writer).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_drops_lease_and_content() {
        let store = MemoryStore::new();
        store.create("entry", true).await.unwrap();
        store.append("entry", b"abc").await.unwrap();
        store.remove("entry").await.unwrap();

        assert!(!store.exists("entry").await.unwrap());
        assert!(matches!(
            store.read_all("entry").await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            store.remove("entry").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
