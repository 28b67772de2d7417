//! A dictionary backed either by native storage or by a foreign object, and
//! the index type shared by both backings.

use crate::bridged::adopt_native_storage;
use crate::cocoa_dictionary::{CocoaDictionary, CocoaIndex};
use crate::foreign::{unbridge_or_err, Bridge, ForeignHandle};
use crate::foreign_dictionary::{object_identity, ForeignDictionaryRef};
use crate::native_dictionary::{NativeDictionary, NativeIndex};
use core::cmp::Ordering;
use core::hash::{BuildHasher, Hash};
use hashbrown::DefaultHashBuilder;
use tracing::debug;

#[derive(Clone, Debug)]
pub enum DictionaryIndex {
    Native(NativeIndex),
    Cocoa(CocoaIndex),
}

impl PartialEq for DictionaryIndex {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DictionaryIndex::Native(a), DictionaryIndex::Native(b)) => a == b,
            (DictionaryIndex::Cocoa(a), DictionaryIndex::Cocoa(b)) => a == b,
            _ => panic!("Comparing indexes from different dictionaries"),
        }
    }
}

impl Eq for DictionaryIndex {}

impl PartialOrd for DictionaryIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DictionaryIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DictionaryIndex::Native(a), DictionaryIndex::Native(b)) => a.cmp(b),
            (DictionaryIndex::Cocoa(a), DictionaryIndex::Cocoa(b)) => a.cmp(b),
            _ => panic!("Comparing indexes from different dictionaries"),
        }
    }
}

/// Native-or-foreign dictionary with a single read API.
#[derive(Debug)]
pub enum DictionaryVariant<K, V, S = DefaultHashBuilder> {
    Native(NativeDictionary<K, V, S>),
    Cocoa(CocoaDictionary),
}

impl<K, V, S> DictionaryVariant<K, V, S>
where
    K: Bridge + Eq + Hash + Clone + Send + Sync + 'static,
    V: Bridge + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Default + Send + Sync + 'static,
{
    /// Take over a foreign dictionary. Views produced by `bridged()` hand
    /// back their native storage; anything else is wrapped as is.
    pub fn from_foreign(object: ForeignDictionaryRef) -> Self {
        match adopt_native_storage::<K, V, S>(&object) {
            Some(native) => {
                debug!(count = native.len(), "adopted native storage from bridged dictionary");
                DictionaryVariant::Native(native)
            }
            None => {
                debug!(
                    identity = object_identity(&object),
                    "wrapping foreign dictionary"
                );
                DictionaryVariant::Cocoa(CocoaDictionary::new(object))
            }
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, DictionaryVariant::Native(_))
    }

    pub fn count(&self) -> usize {
        match self {
            DictionaryVariant::Native(n) => n.len(),
            DictionaryVariant::Cocoa(c) => c.count(),
        }
    }

    /// Value for `key`. On a foreign backing, a value without a native
    /// counterpart reads as absent.
    pub fn lookup(&self, key: &K) -> Option<V> {
        match self {
            DictionaryVariant::Native(n) => n.get(key).cloned(),
            DictionaryVariant::Cocoa(c) => c.lookup(&key.bridge()).and_then(|v| V::unbridge(&v)),
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        match self {
            DictionaryVariant::Native(n) => n.contains_key(key),
            DictionaryVariant::Cocoa(c) => c.contains(&key.bridge()),
        }
    }

    pub fn start_index(&self) -> DictionaryIndex {
        match self {
            DictionaryVariant::Native(n) => DictionaryIndex::Native(n.start_index()),
            DictionaryVariant::Cocoa(c) => DictionaryIndex::Cocoa(c.start_index()),
        }
    }

    pub fn end_index(&self) -> DictionaryIndex {
        match self {
            DictionaryVariant::Native(n) => DictionaryIndex::Native(n.end_index()),
            DictionaryVariant::Cocoa(c) => DictionaryIndex::Cocoa(c.end_index()),
        }
    }

    pub fn index_after(&self, index: &DictionaryIndex) -> DictionaryIndex {
        match (self, index) {
            (DictionaryVariant::Native(n), DictionaryIndex::Native(i)) => {
                DictionaryIndex::Native(n.index_after(i))
            }
            (DictionaryVariant::Cocoa(c), DictionaryIndex::Cocoa(i)) => {
                DictionaryIndex::Cocoa(c.index_after(i))
            }
            _ => invalid_index(),
        }
    }

    pub fn index_for_key(&self, key: &K) -> Option<DictionaryIndex> {
        match self {
            DictionaryVariant::Native(n) => n.index_for_key(key).map(DictionaryIndex::Native),
            DictionaryVariant::Cocoa(c) => {
                c.index_for_key(&key.bridge()).map(DictionaryIndex::Cocoa)
            }
        }
    }

    /// Entry at `index`. Foreign entries are force-bridged; one without a
    /// native counterpart is fatal.
    pub fn element_at(&self, index: &DictionaryIndex) -> (K, V) {
        match (self, index) {
            (DictionaryVariant::Native(n), DictionaryIndex::Native(i)) => {
                let (k, v) = n.entry_at(i);
                (k.clone(), v.clone())
            }
            (DictionaryVariant::Cocoa(c), DictionaryIndex::Cocoa(i)) => {
                let (k, v) = c.lookup_index(i);
                (force_unbridge(&k), force_unbridge(&v))
            }
            _ => invalid_index(),
        }
    }

    /// Foreign view of this dictionary. A foreign backing is returned as is.
    pub fn bridged(self) -> ForeignDictionaryRef {
        match self {
            DictionaryVariant::Native(n) => n.bridged(),
            DictionaryVariant::Cocoa(c) => c.object().clone(),
        }
    }
}

impl<K, V, S> From<NativeDictionary<K, V, S>> for DictionaryVariant<K, V, S> {
    fn from(native: NativeDictionary<K, V, S>) -> Self {
        DictionaryVariant::Native(native)
    }
}

fn force_unbridge<T: Bridge>(handle: &ForeignHandle) -> T {
    unbridge_or_err(handle).unwrap_or_else(|e| panic!("{}", e))
}

fn invalid_index() -> ! {
    panic!("Attempting to access Dictionary elements using an invalid index")
}
