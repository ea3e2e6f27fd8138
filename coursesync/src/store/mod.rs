//! Transactional record store.
//!
//! The store is the single source of truth shared by the transfer pipeline
//! and the sync selector. It mirrors the remote state the engine cares about:
//! transfer batches, their items, and persisted selection records.
//!
//! # Serialized Execution Context
//!
//! All access goes through one mutex. [`Store::perform`] runs a closure
//! against a working copy of the snapshot while holding the lock, so two
//! mutations of the same record can never interleave. Callers block until
//! their unit of work has been committed or rolled back.
//!
//! ```text
//! perform(work) ──► lock ──► clone snapshot ──► work(&mut tx)
//!                                                  │
//!                         ┌── Err ◄────────────────┤
//!                         │                        ▼ Ok (dirty)
//!                      rollback          Persistence::save(working)
//!                                           │            │
//!                                         Err ──►     Ok ──► commit
//!                                       rollback
//! ```
//!
//! # Example
//!
//! ```ignore
//! use coursesync::store::{Store, StoreError};
//!
//! let store = Store::in_memory();
//! store.perform(|tx| {
//!     tx.insert_batch(batch);
//!     tx.insert_item(item)?;
//!     Ok::<_, StoreError>(())
//! })?;
//! ```

mod error;
mod persistence;
mod records;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use error::{StoreError, StoreResult};
pub use persistence::{JsonFilePersistence, MemoryPersistence, Persistence};
pub use records::{
    BatchContext, BatchId, ItemId, SelectionKey, SelectionRecord, TransferBatch,
    TransferDirection, TransferItem, TransferTarget, UploadContext, COMPLETED_WITHOUT_RESULT,
    FAILED_TO_START,
};

/// Shared handle to a store.
pub type SharedStore = Arc<Store>;

// =============================================================================
// Snapshot
// =============================================================================

/// Complete store contents at one point in time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub items: BTreeMap<ItemId, TransferItem>,
    pub batches: BTreeMap<BatchId, TransferBatch>,
    /// Selection records keyed by [`SelectionKey::storage_key`].
    pub selections: BTreeMap<String, SelectionRecord>,
}

impl Snapshot {
    pub fn batch(&self, id: &BatchId) -> Option<&TransferBatch> {
        self.batches.get(id)
    }

    pub fn item(&self, id: &ItemId) -> Option<&TransferItem> {
        self.items.get(id)
    }

    /// Items of a batch in insertion order.
    ///
    /// Fails if the batch does not exist.
    pub fn batch_items(&self, id: &BatchId) -> StoreResult<Vec<&TransferItem>> {
        let batch = self
            .batches
            .get(id)
            .ok_or_else(|| StoreError::BatchNotFound(id.clone()))?;
        Ok(batch
            .item_ids
            .iter()
            .filter_map(|item_id| self.items.get(item_id))
            .collect())
    }

    /// Items matching a predicate, in identifier order.
    pub fn items_where<P>(&self, predicate: P) -> Vec<&TransferItem>
    where
        P: Fn(&TransferItem) -> bool,
    {
        self.items.values().filter(|item| predicate(item)).collect()
    }

    /// Item currently stamped with the given task tag.
    pub fn item_by_tag(&self, tag: &str) -> Option<&TransferItem> {
        self.items
            .values()
            .find(|item| item.task_tag.as_deref() == Some(tag))
    }

    pub fn selection(&self, key: &SelectionKey) -> Option<&SelectionRecord> {
        self.selections.get(&key.storage_key())
    }

    /// All selection records belonging to one course.
    pub fn selections_for_course(&self, course_id: &str) -> Vec<&SelectionRecord> {
        self.selections
            .values()
            .filter(|record| record.key.course_id == course_id)
            .collect()
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Mutable view of the working snapshot inside [`Store::perform`].
///
/// Reads are available through `Deref<Target = Snapshot>`.
pub struct Transaction<'a> {
    snapshot: &'a mut Snapshot,
    dirty: bool,
}

impl Deref for Transaction<'_> {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &*self.snapshot
    }
}

impl Transaction<'_> {
    /// Insert or replace a batch.
    pub fn insert_batch(&mut self, batch: TransferBatch) {
        self.dirty = true;
        self.snapshot.batches.insert(batch.id.clone(), batch);
    }

    /// Insert an item and append it to its batch.
    pub fn insert_item(&mut self, item: TransferItem) -> StoreResult<ItemId> {
        let batch = self
            .snapshot
            .batches
            .get_mut(&item.batch_id)
            .ok_or_else(|| StoreError::BatchNotFound(item.batch_id.clone()))?;
        let id = item.id;
        if !batch.item_ids.contains(&id) {
            batch.item_ids.push(id);
        }
        self.snapshot.items.insert(id, item);
        self.dirty = true;
        Ok(id)
    }

    /// Apply a mutation to one item.
    pub fn update_item<F>(&mut self, id: &ItemId, update: F) -> StoreResult<()>
    where
        F: FnOnce(&mut TransferItem),
    {
        let item = self
            .snapshot
            .items
            .get_mut(id)
            .ok_or(StoreError::ItemNotFound(*id))?;
        update(item);
        self.dirty = true;
        Ok(())
    }

    /// Remove one item and unlink it from its batch.
    pub fn delete_item(&mut self, id: &ItemId) -> StoreResult<TransferItem> {
        let item = self
            .snapshot
            .items
            .remove(id)
            .ok_or(StoreError::ItemNotFound(*id))?;
        if let Some(batch) = self.snapshot.batches.get_mut(&item.batch_id) {
            batch.item_ids.retain(|item_id| item_id != id);
        }
        self.dirty = true;
        Ok(item)
    }

    /// Remove a batch together with all of its items.
    pub fn delete_batch(&mut self, id: &BatchId) -> StoreResult<Vec<TransferItem>> {
        let batch = self
            .snapshot
            .batches
            .remove(id)
            .ok_or_else(|| StoreError::BatchNotFound(id.clone()))?;
        let removed = batch
            .item_ids
            .iter()
            .filter_map(|item_id| self.snapshot.items.remove(item_id))
            .collect();
        self.dirty = true;
        Ok(removed)
    }

    /// Insert or replace a selection record.
    pub fn upsert_selection(&mut self, record: SelectionRecord) {
        self.dirty = true;
        self.snapshot
            .selections
            .insert(record.key.storage_key(), record);
    }
}

// =============================================================================
// Store
// =============================================================================

/// Transactional record store with a pluggable persistence backend.
pub struct Store {
    snapshot: Mutex<Snapshot>,
    persistence: Arc<dyn Persistence>,
}

impl Store {
    /// Create a store that keeps nothing beyond process lifetime.
    pub fn in_memory() -> Self {
        Self {
            snapshot: Mutex::new(Snapshot::default()),
            persistence: Arc::new(MemoryPersistence),
        }
    }

    /// Open a store, loading the last committed snapshot from the backend.
    pub fn open(persistence: Arc<dyn Persistence>) -> StoreResult<Self> {
        let snapshot = persistence.load()?.unwrap_or_default();
        Ok(Self {
            snapshot: Mutex::new(snapshot),
            persistence,
        })
    }

    /// Run a read-only query against the committed snapshot.
    pub fn read<T, F>(&self, query: F) -> T
    where
        F: FnOnce(&Snapshot) -> T,
    {
        let guard = self.snapshot.lock();
        query(&guard)
    }

    /// Run one all-or-nothing unit of work.
    ///
    /// Changes are committed only if `work` returns `Ok` and the backend
    /// accepts the new snapshot; otherwise the store is left untouched.
    pub fn perform<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.snapshot.lock();
        let mut working = guard.clone();

        let (value, dirty) = {
            let mut tx = Transaction {
                snapshot: &mut working,
                dirty: false,
            };
            let value = work(&mut tx)?;
            (value, tx.dirty)
        };

        if dirty {
            self.persistence.save(&working)?;
            *guard = working;
        }
        Ok(value)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.snapshot.lock();
        f.debug_struct("Store")
            .field("batches", &guard.batches.len())
            .field("items", &guard.items.len())
            .field("selections", &guard.selections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn batch(id: &str) -> TransferBatch {
        TransferBatch::new(
            BatchId::from(id),
            BatchContext::Upload {
                context: UploadContext::User,
            },
        )
    }

    fn item(batch_id: &str, name: &str) -> TransferItem {
        TransferItem::new(
            BatchId::from(batch_id),
            TransferDirection::Upload,
            PathBuf::from(name),
            TransferTarget::Upload {
                context: UploadContext::User,
                folder_path: None,
            },
            10,
        )
    }

    /// Backend whose saves can be made to fail on demand.
    #[derive(Default)]
    struct FlakyPersistence {
        fail: AtomicBool,
    }

    impl Persistence for FlakyPersistence {
        fn load(&self) -> StoreResult<Option<Snapshot>> {
            Ok(None)
        }

        fn save(&self, _snapshot: &Snapshot) -> StoreResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                Err(StoreError::Persistence("disk full".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_insert_and_read_batch_items_in_order() {
        let store = Store::in_memory();
        let (a, b) = (item("b1", "a.txt"), item("b1", "b.txt"));
        let (a_id, b_id) = (a.id, b.id);

        store
            .perform(|tx| {
                tx.insert_batch(batch("b1"));
                tx.insert_item(a)?;
                tx.insert_item(b)?;
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let ids: Vec<ItemId> = store.read(|s| {
            s.batch_items(&BatchId::from("b1"))
                .unwrap()
                .iter()
                .map(|i| i.id)
                .collect()
        });
        assert_eq!(ids, vec![a_id, b_id]);
    }

    #[test]
    fn test_insert_item_without_batch_fails() {
        let store = Store::in_memory();
        let result = store.perform(|tx| tx.insert_item(item("missing", "a.txt")));
        assert!(matches!(result, Err(StoreError::BatchNotFound(_))));
        assert!(store.read(|s| s.items.is_empty()));
    }

    #[test]
    fn test_closure_error_rolls_back() {
        let store = Store::in_memory();
        let result: Result<(), StoreError> = store.perform(|tx| {
            tx.insert_batch(batch("b1"));
            Err(StoreError::Persistence("abort".to_string()))
        });

        assert!(result.is_err());
        assert!(store.read(|s| s.batches.is_empty()));
    }

    #[test]
    fn test_persistence_error_rolls_back() {
        let persistence = Arc::new(FlakyPersistence::default());
        let store = Store::open(persistence.clone()).unwrap();

        store
            .perform(|tx| {
                tx.insert_batch(batch("b1"));
                Ok::<_, StoreError>(())
            })
            .unwrap();

        persistence.fail.store(true, Ordering::SeqCst);
        let result = store.perform(|tx| {
            tx.insert_batch(batch("b2"));
            Ok::<_, StoreError>(())
        });

        assert!(matches!(result, Err(StoreError::Persistence(_))));
        assert!(store.read(|s| s.batch(&BatchId::from("b1")).is_some()));
        assert!(store.read(|s| s.batch(&BatchId::from("b2")).is_none()));
    }

    #[test]
    fn test_read_only_work_skips_persistence() {
        let persistence = Arc::new(FlakyPersistence::default());
        persistence.fail.store(true, Ordering::SeqCst);
        let store = Store::open(persistence).unwrap();

        let count = store.perform(|tx| Ok::<_, StoreError>(tx.items.len()));
        assert_eq!(count.unwrap(), 0);
    }

    #[test]
    fn test_delete_batch_removes_items() {
        let store = Store::in_memory();
        store
            .perform(|tx| {
                tx.insert_batch(batch("b1"));
                tx.insert_item(item("b1", "a.txt"))?;
                tx.insert_item(item("b1", "b.txt"))?;
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let removed = store
            .perform(|tx| tx.delete_batch(&BatchId::from("b1")))
            .unwrap();

        assert_eq!(removed.len(), 2);
        assert!(store.read(|s| s.items.is_empty() && s.batches.is_empty()));
    }

    #[test]
    fn test_delete_item_unlinks_from_batch() {
        let store = Store::in_memory();
        let doomed = item("b1", "a.txt");
        let doomed_id = doomed.id;
        store
            .perform(|tx| {
                tx.insert_batch(batch("b1"));
                tx.insert_item(doomed)?;
                Ok::<_, StoreError>(())
            })
            .unwrap();

        store.perform(|tx| tx.delete_item(&doomed_id)).unwrap();

        assert!(store.read(|s| s
            .batch(&BatchId::from("b1"))
            .unwrap()
            .item_ids
            .is_empty()));
    }

    #[test]
    fn test_item_by_tag() {
        let store = Store::in_memory();
        let mut tagged = item("b1", "a.txt");
        tagged.task_tag = Some("item:v1:abc".to_string());
        let tagged_id = tagged.id;
        store
            .perform(|tx| {
                tx.insert_batch(batch("b1"));
                tx.insert_item(tagged)?;
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let found = store.read(|s| s.item_by_tag("item:v1:abc").map(|i| i.id));
        assert_eq!(found, Some(tagged_id));
    }

    #[test]
    fn test_selection_records_by_course() {
        let store = Store::in_memory();
        store
            .perform(|tx| {
                tx.upsert_selection(SelectionRecord::new(SelectionKey::course("1")));
                tx.upsert_selection(SelectionRecord::new(SelectionKey::file("1", "5")));
                tx.upsert_selection(SelectionRecord::new(SelectionKey::course("2")));
                Ok::<_, StoreError>(())
            })
            .unwrap();

        assert_eq!(store.read(|s| s.selections_for_course("1").len()), 2);
        assert!(store.read(|s| s.selection(&SelectionKey::file("1", "5")).is_some()));
    }

    #[test]
    fn test_open_reloads_committed_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = Store::open(Arc::new(JsonFilePersistence::new(&path))).unwrap();
            store
                .perform(|tx| {
                    tx.insert_batch(batch("b1"));
                    tx.insert_item(item("b1", "a.txt"))?;
                    Ok::<_, StoreError>(())
                })
                .unwrap();
        }

        let reopened = Store::open(Arc::new(JsonFilePersistence::new(&path))).unwrap();
        assert_eq!(reopened.read(|s| s.items.len()), 1);
    }
}
