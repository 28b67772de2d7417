//! The foreign framework's dictionary protocol.
//!
//! Everything the foreign side can ask of a dictionary goes through
//! `ForeignDictionary`: keyed lookup, bulk export, block enumeration, the
//! resumable fast-enumeration call and a key enumerator. Native dictionaries
//! implement it when bridged; `PlainDictionary` is the foreign framework's own
//! immutable dictionary and is what an externally supplied dictionary looks
//! like to this crate.

use crate::foreign::ForeignHandle;
use core::any::Any;
use core::fmt;
use hashbrown::hash_table::Entry;
use hashbrown::HashTable;
use std::marker::PhantomData;
use std::sync::Arc;

/// Shared reference to a foreign dictionary object.
pub type ForeignDictionaryRef = Arc<dyn ForeignDictionary>;

/// Caller-owned cursor for `count_by_enumerating`.
///
/// `state` is zero before the first call and set to a non-zero token by the
/// collection. `mutations` identifies the source collection; callers compare
/// it across calls to detect a swapped or mutated source. `extra` is
/// reserved for the collection's resume position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FastEnumerationState {
    pub state: usize,
    pub mutations: usize,
    pub extra: [usize; 5],
}

impl FastEnumerationState {
    pub const fn new() -> Self {
        Self {
            state: 0,
            mutations: 0,
            extra: [0; 5],
        }
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.state != 0
    }
}

pub trait ForeignDictionary: Send + Sync + fmt::Debug {
    fn count(&self) -> usize;

    /// Value for `key`, or `None`. A key that is missing and a key with no
    /// native counterpart are reported the same way.
    fn object_for_key(&self, key: &ForeignHandle) -> Option<ForeignHandle>;

    /// Write up to `count` entries in enumeration order. Either buffer may be
    /// omitted; a provided buffer must hold `min(count, self.count())` items.
    fn get_objects_and_keys(
        &self,
        objects: Option<&mut [Option<ForeignHandle>]>,
        keys: Option<&mut [Option<ForeignHandle>]>,
        count: usize,
    );

    /// Invoke `block(key, value, stop)` per entry until `*stop` is set.
    fn enumerate_keys_and_objects(
        &self,
        block: &mut dyn FnMut(&ForeignHandle, &ForeignHandle, &mut bool),
    );

    /// Write up to `objects.len()` keys, continuing from `state`. Returns the
    /// number written; zero means the enumeration is exhausted.
    fn count_by_enumerating(
        &self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize;

    fn key_enumerator(&self) -> Box<dyn ForeignEnumerator>;

    /// Immutable dictionaries copy to themselves.
    fn copy(self: Arc<Self>) -> ForeignDictionaryRef;

    fn as_any(&self) -> &dyn Any;
}

/// Pull-style key enumeration over a foreign dictionary.
///
/// Fast enumeration and `next_object` on the same enumerator share one
/// traversal position.
pub trait ForeignEnumerator {
    fn next_object(&mut self) -> Option<ForeignHandle>;

    fn count_by_enumerating(
        &mut self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize;
}

/// Identity of a foreign dictionary object.
#[inline]
pub fn object_identity(object: &ForeignDictionaryRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Immutable dictionary created by the foreign framework itself.
pub struct PlainDictionary {
    entries: Arc<[(ForeignHandle, ForeignHandle)]>,
    index: HashTable<usize>,
}

impl PlainDictionary {
    pub fn new() -> Self {
        Self::from_pairs(core::iter::empty())
    }

    /// Later pairs replace the value of an equal earlier key.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (ForeignHandle, ForeignHandle)>,
    {
        let mut entries: Vec<(ForeignHandle, ForeignHandle)> = Vec::new();
        let mut index: HashTable<usize> = HashTable::new();
        for (key, value) in pairs {
            let hash = key.object().foreign_hash();
            match index.entry(
                hash,
                |&i| entries[i].0 == key,
                |&i| entries[i].0.object().foreign_hash(),
            ) {
                Entry::Occupied(o) => entries[*o.get()].1 = value,
                Entry::Vacant(v) => {
                    v.insert(entries.len());
                    entries.push((key, value));
                }
            }
        }
        Self {
            entries: entries.into(),
            index,
        }
    }

    pub fn into_ref(self) -> ForeignDictionaryRef {
        Arc::new(self)
    }

    fn find(&self, key: &ForeignHandle) -> Option<usize> {
        let hash = key.object().foreign_hash();
        self.index
            .find(hash, |&i| self.entries[i].0 == *key)
            .copied()
    }

    fn identity(&self) -> usize {
        self as *const Self as usize
    }
}

impl Default for PlainDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PlainDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl ForeignDictionary for PlainDictionary {
    fn count(&self) -> usize {
        self.entries.len()
    }

    fn object_for_key(&self, key: &ForeignHandle) -> Option<ForeignHandle> {
        self.find(key).map(|i| self.entries[i].1.clone())
    }

    fn get_objects_and_keys(
        &self,
        mut objects: Option<&mut [Option<ForeignHandle>]>,
        mut keys: Option<&mut [Option<ForeignHandle>]>,
        count: usize,
    ) {
        let n = count.min(self.entries.len());
        for (i, (key, value)) in self.entries.iter().take(n).enumerate() {
            if let Some(keys) = keys.as_deref_mut() {
                keys[i] = Some(key.clone());
            }
            if let Some(objects) = objects.as_deref_mut() {
                objects[i] = Some(value.clone());
            }
        }
    }

    fn enumerate_keys_and_objects(
        &self,
        block: &mut dyn FnMut(&ForeignHandle, &ForeignHandle, &mut bool),
    ) {
        let mut stop = false;
        for (key, value) in self.entries.iter() {
            block(key, value, &mut stop);
            if stop {
                return;
            }
        }
    }

    fn count_by_enumerating(
        &self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        if !state.is_started() {
            state.state = 1;
            state.mutations = self.identity();
            state.extra[0] = 0;
        }
        let start = state.extra[0];
        assert!(start <= self.entries.len(), "Invalid fast enumeration state");
        let mut stored = 0;
        for (slot, (key, _)) in objects.iter_mut().zip(self.entries[start..].iter()) {
            *slot = Some(key.clone());
            stored += 1;
        }
        state.extra[0] = start + stored;
        stored
    }

    fn key_enumerator(&self) -> Box<dyn ForeignEnumerator> {
        Box::new(PlainKeyEnumerator {
            entries: Arc::clone(&self.entries),
            next: 0,
            _nosend: PhantomData,
        })
    }

    fn copy(self: Arc<Self>) -> ForeignDictionaryRef {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct PlainKeyEnumerator {
    entries: Arc<[(ForeignHandle, ForeignHandle)]>,
    next: usize,
    // Enumerators are single-threaded cursors.
    _nosend: PhantomData<*mut ()>,
}

impl ForeignEnumerator for PlainKeyEnumerator {
    fn next_object(&mut self) -> Option<ForeignHandle> {
        let key = self.entries.get(self.next)?.0.clone();
        self.next += 1;
        Some(key)
    }

    fn count_by_enumerating(
        &mut self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        if !state.is_started() {
            state.state = 1;
            state.mutations = Arc::as_ptr(&self.entries) as *const () as usize;
        }
        match objects.first_mut() {
            Some(slot) => match self.next_object() {
                Some(key) => {
                    *slot = Some(key);
                    1
                }
                None => 0,
            },
            None => 0,
        }
    }
}
