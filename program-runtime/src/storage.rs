//! Store binding and read/write-set bookkeeping
//!
//! The versioned key-value store and the commit algorithm live outside this
//! crate. They are reached through the [`VersionedStore`] and
//! [`CommitCoordinator`] traits; every contract sees the shared store only
//! through a [`StoreView`] confined to its own key prefix.

use crate::error::{HostVmError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Contract or account address
pub type Address = [u8; 20];

/// The all-zero address (unset sender, top-level contract before staging)
pub const ZERO_ADDRESS: Address = [0u8; 20];

/// Build an address from guest bytes: copies up to 20 bytes, zero-fills the rest
pub fn address_from_slice(bytes: &[u8]) -> Address {
    let mut address = ZERO_ADDRESS;
    let len = bytes.len().min(address.len());
    address[..len].copy_from_slice(&bytes[..len]);
    address
}

/// Raw store key for `key` inside the partition owned by `address`.
///
/// Addresses are fixed-width, so distinct `(address, key)` pairs never map
/// to the same raw key.
pub fn namespaced_key(address: &Address, key: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(address.len().saturating_add(key.len()));
    raw.extend_from_slice(address);
    raw.extend_from_slice(key);
    raw
}

/// Version tag attached to every committed value
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    /// Block height
    pub height: u32,
    /// Transaction index within the block
    pub tx_index: u32,
}

impl Version {
    /// Version observed when a key has never been written
    pub const ZERO: Version = Version { height: 0, tx_index: 0 };

    /// Create a version tag
    pub const fn new(height: u32, tx_index: u32) -> Self {
        Self { height, tx_index }
    }
}

/// A stored value together with the version that wrote it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// Value bytes
    pub value: Vec<u8>,
    /// Version of the commit that produced it
    pub version: Version,
}

/// One key touched by a contract during one (sub)invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RwSetItem {
    /// Key inside the contract's partition
    pub key: Vec<u8>,
    /// Version seen by the first read, `Version::ZERO` if the key was absent
    pub observed_version: Option<Version>,
    /// Last value written
    pub written_value: Option<Vec<u8>>,
}

/// Storage accesses of one contract address, in first-access order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RwSet {
    /// Contract whose partition was accessed
    pub address: Address,
    /// Accessed keys
    pub items: Vec<RwSetItem>,
}

/// Errors reported by a commit coordinator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommitError {
    /// A read in the submitted sets is stale
    #[error(
        "read conflict on contract {address:02x?} key {key:02x?}: \
         observed {observed:?}, current {current:?}"
    )]
    Conflict {
        /// Contract that performed the read
        address: Address,
        /// Key inside the contract's partition
        key: Vec<u8>,
        /// Version recorded at read time
        observed: Version,
        /// Version found at commit time
        current: Version,
    },

    /// The backing store failed while validating or applying
    #[error("store failure: {0}")]
    Store(String),
}

/// Shared versioned key-value store
///
/// Implemented by the node's storage layer. Keys passed here are already
/// namespaced by contract address.
pub trait VersionedStore: Send + Sync {
    /// Read the latest committed value of a raw key
    fn get(&self, key: &[u8]) -> Result<Option<VersionedValue>>;

    /// Overwrite a raw key
    fn set(&self, key: &[u8], value: VersionedValue) -> Result<()>;
}

/// Validates and applies an ordered list of read/write sets
pub trait CommitCoordinator: Send + Sync {
    /// Commit `sets` atomically at `version`
    ///
    /// `sets` arrive in call-exit order, with the top-level contract's set last.
    fn commit(
        &self,
        store: &dyn VersionedStore,
        sets: &[RwSet],
        version: Version,
    ) -> std::result::Result<(), CommitError>;
}

/// Namespaced view of the shared store for one contract address.
///
/// Reads go to the committed state; writes are buffered until commit.
pub struct StoreView {
    address: Address,
    store: Arc<dyn VersionedStore>,
    items: IndexMap<Vec<u8>, RwSetItem>,
}

impl StoreView {
    /// Open a fresh view (empty read/write set) for `address`
    pub fn new(store: Arc<dyn VersionedStore>, address: Address) -> Self {
        Self {
            address,
            store,
            items: IndexMap::new(),
        }
    }

    /// Address owning this view's partition
    pub fn address(&self) -> &Address {
        &self.address
    }

    fn item(&mut self, key: &[u8]) -> &mut RwSetItem {
        self.items.entry(key.to_vec()).or_insert_with(|| RwSetItem {
            key: key.to_vec(),
            observed_version: None,
            written_value: None,
        })
    }

    /// Latest committed value of `key`, without recording the access
    pub fn peek(&self, key: &[u8]) -> Result<Option<VersionedValue>> {
        self.store.get(&namespaced_key(&self.address, key))
    }

    /// Record that `key` was observed at `version`; the first observation sticks
    pub fn record_read(&mut self, key: &[u8], version: Version) {
        let item = self.item(key);
        if item.observed_version.is_none() {
            item.observed_version = Some(version);
        }
    }

    /// Read a committed value, recording the observed version
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let found = self.peek(key)?;
        self.record_read(key, found.as_ref().map_or(Version::ZERO, |v| v.version));
        Ok(found.map(|v| v.value))
    }

    /// Buffer a write; the last write to a key wins
    pub fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.item(key).written_value = Some(value);
    }

    /// Snapshot of the accesses recorded so far
    pub fn rw_set(&self) -> RwSet {
        RwSet {
            address: self.address,
            items: self.items.values().cloned().collect(),
        }
    }

    /// Close the view, yielding its read/write set
    pub fn close(self) -> RwSet {
        RwSet {
            address: self.address,
            items: self.items.into_values().collect(),
        }
    }
}

impl fmt::Debug for StoreView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreView")
            .field("address", &self.address)
            .field("items", &self.items.len())
            .finish()
    }
}

/// In-memory versioned store.
///
/// Values are kept bincode-encoded, the way a disk-backed store would hold
/// them. Used by the emulator and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of raw keys held
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VersionedStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<VersionedValue>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| HostVmError::Storage("memory store lock poisoned".into()))?;
        entries
            .get(key)
            .map(|bytes| {
                bincode::deserialize(bytes).map_err(|e| HostVmError::Storage(e.to_string()))
            })
            .transpose()
    }

    fn set(&self, key: &[u8], value: VersionedValue) -> Result<()> {
        let bytes = bincode::serialize(&value).map_err(|e| HostVmError::Storage(e.to_string()))?;
        self.entries
            .write()
            .map_err(|_| HostVmError::Storage("memory store lock poisoned".into()))?
            .insert(key.to_vec(), bytes);
        Ok(())
    }
}

/// Store that holds nothing and accepts every write
///
/// Useful for unit tests that never read back.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpStore;

impl VersionedStore for NoOpStore {
    fn get(&self, _key: &[u8]) -> Result<Option<VersionedValue>> {
        Ok(None)
    }

    fn set(&self, _key: &[u8], _value: VersionedValue) -> Result<()> {
        Ok(())
    }
}

/// Optimistic commit: every recorded read must still see the version it
/// observed, then all writes are applied in ledger order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictCheckingCommitter;

impl CommitCoordinator for ConflictCheckingCommitter {
    fn commit(
        &self,
        store: &dyn VersionedStore,
        sets: &[RwSet],
        version: Version,
    ) -> std::result::Result<(), CommitError> {
        let store_err = |e: HostVmError| CommitError::Store(e.to_string());

        for set in sets {
            for item in &set.items {
                let Some(observed) = item.observed_version else {
                    continue;
                };
                let current = store
                    .get(&namespaced_key(&set.address, &item.key))
                    .map_err(store_err)?
                    .map_or(Version::ZERO, |v| v.version);
                if current != observed {
                    return Err(CommitError::Conflict {
                        address: set.address,
                        key: item.key.clone(),
                        observed,
                        current,
                    });
                }
            }
        }

        for set in sets {
            for item in &set.items {
                if let Some(value) = &item.written_value {
                    store
                        .set(
                            &namespaced_key(&set.address, &item.key),
                            VersionedValue {
                                value: value.clone(),
                                version,
                            },
                        )
                        .map_err(store_err)?;
                }
            }
        }

        log::debug!("committed {} read/write sets at {:?}", sets.len(), version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn test_noop_store() {
        let store = NoOpStore;
        let key = namespaced_key(&[1u8; 20], b"test_key");

        assert_eq!(store.get(&key).unwrap(), None);
        assert!(store
            .set(&key, VersionedValue { value: b"v".to_vec(), version: Version::new(1, 1) })
            .is_ok());
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn test_address_from_slice_pads_and_truncates() {
        assert_eq!(address_from_slice(&[7u8; 3])[..4], [7, 7, 7, 0]);
        assert_eq!(address_from_slice(&[9u8; 32]), [9u8; 20]);
        assert_eq!(address_from_slice(&[]), ZERO_ADDRESS);
    }

    #[test]
    fn test_view_records_reads_and_writes_in_first_access_order() {
        let store = shared_store();
        let mut view = StoreView::new(store, [1u8; 20]);

        view.set(b"b", b"1".to_vec());
        assert_eq!(view.get(b"a").unwrap(), None);
        view.set(b"b", b"2".to_vec());

        let set = view.close();
        assert_eq!(set.address, [1u8; 20]);
        assert_eq!(set.items.len(), 2);
        assert_eq!(set.items[0].key, b"b".to_vec());
        assert_eq!(set.items[0].written_value, Some(b"2".to_vec()));
        assert_eq!(set.items[0].observed_version, None);
        assert_eq!(set.items[1].key, b"a".to_vec());
        assert_eq!(set.items[1].observed_version, Some(Version::ZERO));
        assert_eq!(set.items[1].written_value, None);
    }

    #[test]
    fn test_reads_see_committed_state_only() {
        let store = shared_store();
        let mut view = StoreView::new(store.clone(), [1u8; 20]);

        view.set(b"key", b"value".to_vec());
        assert_eq!(view.get(b"key").unwrap(), None);

        ConflictCheckingCommitter
            .commit(store.as_ref(), &[view.close()], Version::new(1, 1))
            .unwrap();

        let mut view = StoreView::new(store, [1u8; 20]);
        assert_eq!(view.get(b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let store = shared_store();
        let mut a = StoreView::new(store.clone(), [0xAA; 20]);
        let mut b = StoreView::new(store.clone(), [0xBB; 20]);
        a.set(b"shared", b"from-a".to_vec());
        b.set(b"shared", b"from-b".to_vec());
        ConflictCheckingCommitter
            .commit(store.as_ref(), &[a.close(), b.close()], Version::new(1, 1))
            .unwrap();

        let mut a = StoreView::new(store.clone(), [0xAA; 20]);
        let mut b = StoreView::new(store.clone(), [0xBB; 20]);
        assert_eq!(a.get(b"shared").unwrap(), Some(b"from-a".to_vec()));
        assert_eq!(b.get(b"shared").unwrap(), Some(b"from-b".to_vec()));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_stale_read_is_a_conflict() {
        let store = shared_store();

        // Read at ZERO, then someone else commits the key
        let mut reader = StoreView::new(store.clone(), [1u8; 20]);
        assert_eq!(reader.get(b"k").unwrap(), None);

        let mut writer = StoreView::new(store.clone(), [1u8; 20]);
        writer.set(b"k", b"v1".to_vec());
        ConflictCheckingCommitter
            .commit(store.as_ref(), &[writer.close()], Version::new(1, 1))
            .unwrap();

        reader.set(b"other", b"x".to_vec());
        let err = ConflictCheckingCommitter
            .commit(store.as_ref(), &[reader.close()], Version::new(2, 1))
            .unwrap_err();
        assert!(matches!(err, CommitError::Conflict { observed: Version::ZERO, .. }));

        // Nothing from the rejected ledger was applied
        let mut check = StoreView::new(store, [1u8; 20]);
        assert_eq!(check.get(b"other").unwrap(), None);
    }

    #[test]
    fn test_later_sets_overwrite_earlier_ones() {
        let store = shared_store();
        let mut first = StoreView::new(store.clone(), [3u8; 20]);
        let mut second = StoreView::new(store.clone(), [3u8; 20]);
        first.set(b"k", b"inner".to_vec());
        second.set(b"k", b"outer".to_vec());
        ConflictCheckingCommitter
            .commit(store.as_ref(), &[first.close(), second.close()], Version::new(1, 1))
            .unwrap();

        let value = store.get(&namespaced_key(&[3u8; 20], b"k")).unwrap().unwrap();
        assert_eq!(value.value, b"outer".to_vec());
        assert_eq!(value.version, Version::new(1, 1));
    }

    #[test]
    fn test_len_survives_poisoned_lock() {
        let store = shared_store();
        let versioned = |value: &[u8]| VersionedValue {
            value: value.to_vec(),
            version: Version::new(1, 1),
        };
        store.set(b"a", versioned(b"1")).unwrap();
        store.set(b"b", versioned(b"2")).unwrap();

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(store.entries.is_poisoned());
        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
    }
}
