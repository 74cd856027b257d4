//! Key-value stores whose entries carry taint.
//!
//! Stores are shared by name across every sandbox. A write records the
//! writer's taint on each key it touches; a read through the trusted API
//! hands the entry's taint to the reader. Plain reads on the host side
//! ([`TaintedStore::get`]) return the value alone.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use warden_core::{ParceledPayload, TaintSet};

use crate::sync::lock;

const STORE_TARGET: &str = "wardend::store";

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    value: ParceledPayload,
    taint: TaintSet,
}

/// One named store.
#[derive(Debug)]
pub struct TaintedStore {
    name: String,
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl TaintedStore {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value stored under `key`, without its taint.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ParceledPayload> {
        lock(&self.entries).get(key).map(|entry| entry.value.clone())
    }

    /// Value and taint stored under `key`.
    #[must_use]
    pub fn read(&self, key: &str) -> Option<(ParceledPayload, TaintSet)> {
        lock(&self.entries)
            .get(key)
            .map(|entry| (entry.value.clone(), entry.taint.clone()))
    }

    /// Taint recorded for `key`; empty for absent keys.
    #[must_use]
    pub fn taint_of(&self, key: &str) -> TaintSet {
        lock(&self.entries)
            .get(key)
            .map(|entry| entry.taint.clone())
            .unwrap_or_default()
    }

    /// Writes one key, recording `writer` as its taint.
    pub fn put(&self, key: impl Into<String>, value: ParceledPayload, writer: &TaintSet) {
        self.edit().put(key, value).commit(writer);
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// True when the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    /// Starts a batch of changes applied together by [`StoreEditor::commit`].
    #[must_use]
    pub const fn edit(&self) -> StoreEditor<'_> {
        StoreEditor {
            store: self,
            pending: BTreeMap::new(),
            extra_for_all: None,
        }
    }
}

#[derive(Debug)]
enum Change {
    Put {
        value: ParceledPayload,
        extra: TaintSet,
    },
    AddTaint(TaintSet),
    Remove,
}

/// Pending changes to a [`TaintedStore`].
///
/// Every key written in the batch takes the committing writer's taint plus
/// any taint added to it; keys only tainted keep their previous taint and
/// gain the new labels.
#[derive(Debug)]
pub struct StoreEditor<'a> {
    store: &'a TaintedStore,
    pending: BTreeMap<String, Change>,
    extra_for_all: Option<TaintSet>,
}

impl StoreEditor<'_> {
    /// Writes `value` under `key`.
    #[must_use]
    pub fn put(mut self, key: impl Into<String>, value: ParceledPayload) -> Self {
        let name = key.into();
        let extra = match self.pending.remove(&name) {
            Some(Change::Put { extra, .. } | Change::AddTaint(extra)) => extra,
            Some(Change::Remove) | None => TaintSet::empty(),
        };
        self.pending.insert(name, Change::Put { value, extra });
        self
    }

    /// Adds `taint` to `key`.
    #[must_use]
    pub fn add_taint(mut self, key: impl Into<String>, taint: &TaintSet) -> Self {
        let name = key.into();
        let change = match self.pending.remove(&name) {
            Some(Change::Put { value, extra }) => Change::Put {
                value,
                extra: extra.merge(taint),
            },
            Some(Change::AddTaint(extra)) => Change::AddTaint(extra.merge(taint)),
            Some(Change::Remove) => Change::Remove,
            None => Change::AddTaint(taint.clone()),
        };
        self.pending.insert(name, change);
        self
    }

    /// Adds `taint` to every key present at commit time.
    #[must_use]
    pub fn add_taint_to_all(mut self, taint: &TaintSet) -> Self {
        self.extra_for_all = Some(
            self.extra_for_all
                .take()
                .map_or_else(|| taint.clone(), |extra| extra.merge(taint)),
        );
        self
    }

    /// Deletes `key`.
    #[must_use]
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.pending.insert(key.into(), Change::Remove);
        self
    }

    /// Applies the batch, tainting written keys with `writer`.
    pub fn commit(self, writer: &TaintSet) {
        let mut entries = lock(&self.store.entries);
        let changed = self.pending.len();
        for (key, change) in self.pending {
            match change {
                Change::Put { value, extra } => {
                    entries.insert(
                        key,
                        Entry {
                            value,
                            taint: writer.merge(&extra),
                        },
                    );
                }
                Change::AddTaint(extra) => {
                    if let Some(entry) = entries.get_mut(&key) {
                        entry.taint = entry.taint.merge(&extra);
                    }
                }
                Change::Remove => {
                    entries.remove(&key);
                }
            }
        }
        if let Some(extra) = self.extra_for_all {
            for entry in entries.values_mut() {
                entry.taint = entry.taint.merge(&extra);
            }
        }
        debug!(
            target: STORE_TARGET,
            store = %self.store.name,
            changed,
            "committed store edit"
        );
    }
}

/// Stores shared by name.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: Mutex<BTreeMap<String, Arc<TaintedStore>>>,
}

impl StoreRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store called `name`, creating it on first use.
    #[must_use]
    pub fn open(&self, name: &str) -> Arc<TaintedStore> {
        let mut stores = lock(&self.stores);
        Arc::clone(
            stores
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(TaintedStore::new(name))),
        )
    }

    /// Returns the store called `name` if it exists.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<TaintedStore>> {
        lock(&self.stores).get(name).cloned()
    }
}
