//! Registry of live progress observers.
//!
//! The session reports callbacks by task tag only. The cache turns a tag
//! into the observer for its item, creating one on demand. That covers the
//! cold-resume case: a task started by a previous process has no observer in
//! memory until its first callback arrives.
//!
//! Observers evict themselves from the cache when they publish their
//! terminal outcome, so the cache never needs to be invalidated from
//! outside. A later request for the same item gets a fresh observer.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::identity::TaskIdentity;
use super::observer::{ObserverFactory, ProgressObserver};
use super::runtime::TaskEvent;
use crate::store::{BatchId, ItemId, SharedStore};

type ObserverMap = DashMap<ItemId, Arc<ProgressObserver>>;

/// Maps items and task tags to their progress observers.
pub struct ObserverCache {
    observers: Arc<ObserverMap>,
    factory: Arc<dyn ObserverFactory>,
    store: SharedStore,
}

impl ObserverCache {
    pub fn new(store: SharedStore, factory: Arc<dyn ObserverFactory>) -> Self {
        Self {
            observers: Arc::new(DashMap::new()),
            factory,
            store,
        }
    }

    /// Return the cached observer for an item, or create and cache one.
    pub fn get_or_create(&self, item_id: ItemId, batch_id: BatchId) -> Arc<ProgressObserver> {
        let observer = match self.observers.entry(item_id) {
            Entry::Occupied(entry) => return Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let observer = self.factory.create(item_id, batch_id);
                entry.insert(Arc::clone(&observer));
                observer
            }
        };

        // Registered after the shard lock is released: the hook removes
        // from the same map.
        let map: Weak<ObserverMap> = Arc::downgrade(&self.observers);
        let instance = Arc::downgrade(&observer);
        observer.on_terminal(move |_| {
            if let Some(map) = map.upgrade() {
                let evicted = map
                    .remove_if(&item_id, |_, cached| {
                        std::ptr::eq(Arc::as_ptr(cached), instance.as_ptr())
                    })
                    .is_some();
                if evicted {
                    trace!(item_id = %item_id, "Evicted finished observer");
                }
            }
        });

        debug!(item_id = %item_id, "Created progress observer");
        observer
    }

    /// Find the observer for a task tag.
    ///
    /// Returns `None` when the tag was not written by this engine or its
    /// item no longer exists.
    pub fn resolve(&self, tag: &str) -> Option<Arc<ProgressObserver>> {
        let Some(identity) = TaskIdentity::decode(tag) else {
            debug!(tag, "Ignoring undecodable task tag");
            return None;
        };
        let item_id = identity.item_id();

        if let Some(observer) = self.observers.get(&item_id) {
            return Some(Arc::clone(observer.value()));
        }

        let batch_id = self
            .store
            .read(|snapshot| snapshot.item(&item_id).map(|item| item.batch_id.clone()));
        match batch_id {
            Some(batch_id) => Some(self.get_or_create(item_id, batch_id)),
            None => {
                debug!(item_id = %item_id, "Task tag refers to a deleted item");
                None
            }
        }
    }

    /// Route one task callback to its observer.
    ///
    /// Returns false if no observer could be resolved for the event's tag.
    pub fn dispatch(&self, event: TaskEvent) -> bool {
        let Some(observer) = self.resolve(event.tag()) else {
            return false;
        };

        match event {
            TaskEvent::Sent {
                total_sent,
                total_expected,
                ..
            } => observer.did_send(total_sent, total_expected),
            TaskEvent::Received {
                total_received,
                total_expected,
                ..
            } => observer.did_receive(total_received, total_expected),
            TaskEvent::Data { data, .. } => observer.did_receive_data(&data),
            TaskEvent::Completed { error, .. } => {
                observer.did_complete(error);
            }
        }
        true
    }

    /// Number of observers currently cached.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Whether an observer for the item is cached.
    pub fn contains(&self, item_id: &ItemId) -> bool {
        self.observers.contains_key(item_id)
    }
}

impl std::fmt::Debug for ObserverCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverCache")
            .field("observers", &self.observers.len())
            .finish()
    }
}
