//! CocoaDictionary: a foreign-supplied dictionary consumed through the
//! native buffer contract.
//!
//! The foreign protocol has no positional index, so an index is a snapshot
//! of every key (taken with one bulk `get_objects_and_keys` call) plus an
//! offset into it. Snapshots are only taken by `start_index`, `end_index`
//! and `index_for_key`; keyed lookup and iteration never build one.

use crate::foreign::{unbridge_or_err, Bridge, BridgeError, ForeignHandle};
use crate::foreign_dictionary::{object_identity, FastEnumerationState, ForeignDictionaryRef};
use crate::native_dictionary::NativeDictionary;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Keys fetched per fast-enumeration call by `CocoaIterator`.
pub const FAST_ENUMERATION_BUFFER_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct CocoaDictionary {
    object: ForeignDictionaryRef,
}

impl CocoaDictionary {
    pub fn new(object: ForeignDictionaryRef) -> Self {
        Self { object }
    }

    pub fn object(&self) -> &ForeignDictionaryRef {
        &self.object
    }

    /// Identity of the wrapped foreign object.
    #[inline]
    pub fn identity(&self) -> usize {
        object_identity(&self.object)
    }

    /// Foreign `isEqualToDictionary:`: same object, or same count and every
    /// key maps to an equal value in `other`.
    pub fn is_equal(&self, other: &CocoaDictionary) -> bool {
        if self.identity() == other.identity() {
            return true;
        }
        if self.count() != other.count() {
            return false;
        }
        let mut equal = true;
        self.object.enumerate_keys_and_objects(&mut |key, value, stop| {
            if other.lookup(key).as_ref() != Some(value) {
                equal = false;
                *stop = true;
            }
        });
        equal
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.object.count()
    }

    #[inline]
    pub fn contains(&self, key: &ForeignHandle) -> bool {
        self.object.object_for_key(key).is_some()
    }

    #[inline]
    pub fn lookup(&self, key: &ForeignHandle) -> Option<ForeignHandle> {
        self.object.object_for_key(key)
    }

    fn all_keys(&self) -> Arc<[ForeignHandle]> {
        let count = self.object.count();
        let mut keys: Vec<Option<ForeignHandle>> = vec![None; count];
        self.object.get_objects_and_keys(None, Some(&mut keys[..]), count);
        trace!(count, "snapshotted foreign dictionary keys");
        keys.into_iter()
            .map(|key| {
                key.unwrap_or_else(|| {
                    panic!("foreign dictionary reported {} keys but exported fewer", count)
                })
            })
            .collect()
    }

    pub fn start_index(&self) -> CocoaIndex {
        CocoaIndex::new(self.clone(), self.all_keys(), 0)
    }

    pub fn end_index(&self) -> CocoaIndex {
        let all_keys = self.all_keys();
        let offset = all_keys.len();
        CocoaIndex::new(self.clone(), all_keys, offset)
    }

    fn validate(&self, index: &CocoaIndex) {
        assert!(
            index.storage.base.identity() == self.identity(),
            "Attempting to access Dictionary elements using an invalid index"
        );
        assert!(
            index.storage.offset < index.storage.all_keys.len(),
            "Attempting to access Dictionary elements using endIndex"
        );
    }

    pub fn index_after(&self, index: &CocoaIndex) -> CocoaIndex {
        let mut next = index.clone();
        self.form_index_after(&mut next);
        next
    }

    /// Advance `index` in place. Copies of `index` taken earlier keep their
    /// position.
    pub fn form_index_after(&self, index: &mut CocoaIndex) {
        self.validate(index);
        Arc::make_mut(&mut index.storage).offset += 1;
    }

    /// Index of `key`. Absent keys cost a single foreign lookup; present keys
    /// additionally pay for a snapshot and a linear scan.
    pub fn index_for_key(&self, key: &ForeignHandle) -> Option<CocoaIndex> {
        self.lookup(key)?;
        let all_keys = self.all_keys();
        let offset = all_keys.iter().position(|k| k == key).unwrap_or_else(|| {
            panic!("key {:?} found by lookup is missing from the key snapshot", key)
        });
        Some(CocoaIndex::new(self.clone(), all_keys, offset))
    }

    /// Entry at `index`.
    pub fn lookup_index(&self, index: &CocoaIndex) -> (ForeignHandle, ForeignHandle) {
        let key = self.key_at(index);
        let value = self.value_for_snapshot_key(&key);
        (key, value)
    }

    pub fn key_at(&self, index: &CocoaIndex) -> ForeignHandle {
        self.validate(index);
        index.storage.all_keys[index.storage.offset].clone()
    }

    pub fn value_at(&self, index: &CocoaIndex) -> ForeignHandle {
        let key = self.key_at(index);
        self.value_for_snapshot_key(&key)
    }

    fn value_for_snapshot_key(&self, key: &ForeignHandle) -> ForeignHandle {
        self.lookup(key).unwrap_or_else(|| {
            panic!(
                "{}",
                BridgeError::MissingValue {
                    key: format!("{:?}", key)
                }
            )
        })
    }

    pub fn iter(&self) -> CocoaIterator {
        CocoaIterator::new(self.clone())
    }

    /// Convert every entry to native types, transforming values with
    /// `transform`, in a single pass over the foreign dictionary.
    pub fn try_map_values<K, V, T, S, F>(
        &self,
        mut transform: F,
    ) -> Result<NativeDictionary<K, T, S>, BridgeError>
    where
        K: Bridge + Eq + Hash + Clone,
        V: Bridge,
        T: Clone,
        S: BuildHasher + Default,
        F: FnMut(V) -> T,
    {
        let mut result = NativeDictionary::with_capacity_and_hasher(self.count(), S::default());
        let mut failure = None;
        self.object.enumerate_keys_and_objects(&mut |key, value, stop| {
            let entry = unbridge_or_err::<K>(key)
                .and_then(|k| unbridge_or_err::<V>(value).map(|v| (k, v)));
            let outcome = entry.and_then(|(k, v)| {
                result
                    .insert_new(k, transform(v))
                    .map(|_| ())
                    .map_err(|_| BridgeError::DuplicateKey {
                        key: format!("{:?}", key),
                    })
            });
            if let Err(e) = outcome {
                failure = Some(e);
                *stop = true;
            }
        });
        match failure {
            Some(e) => Err(e),
            None => {
                trace!(count = result.len(), "converted foreign dictionary to native storage");
                Ok(result)
            }
        }
    }

    /// Like `try_map_values`, but a key or value without a native
    /// counterpart is fatal.
    pub fn map_values<K, V, T, S, F>(&self, transform: F) -> NativeDictionary<K, T, S>
    where
        K: Bridge + Eq + Hash + Clone,
        V: Bridge,
        T: Clone,
        S: BuildHasher + Default,
        F: FnMut(V) -> T,
    {
        self.try_map_values(transform)
            .unwrap_or_else(|e| panic!("{}", e))
    }
}

impl<'a> IntoIterator for &'a CocoaDictionary {
    type Item = (ForeignHandle, ForeignHandle);
    type IntoIter = CocoaIterator;

    fn into_iter(self) -> CocoaIterator {
        self.iter()
    }
}

#[derive(Clone)]
struct CocoaIndexStorage {
    base: CocoaDictionary,
    all_keys: Arc<[ForeignHandle]>,
    offset: usize,
}

/// Position in a `CocoaDictionary`: a key snapshot and an offset into it.
#[derive(Clone)]
pub struct CocoaIndex {
    storage: Arc<CocoaIndexStorage>,
}

impl CocoaIndex {
    fn new(base: CocoaDictionary, all_keys: Arc<[ForeignHandle]>, offset: usize) -> Self {
        debug_assert!(offset <= all_keys.len());
        Self {
            storage: Arc::new(CocoaIndexStorage {
                base,
                all_keys,
                offset,
            }),
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.storage.offset
    }

    /// Identity of the dictionary this index was created from.
    #[inline]
    pub fn owner_identity(&self) -> usize {
        self.storage.base.identity()
    }

    fn check_same_owner(&self, other: &CocoaIndex) {
        assert!(
            self.owner_identity() == other.owner_identity(),
            "Comparing indexes from different dictionaries"
        );
    }
}

impl fmt::Debug for CocoaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CocoaIndex")
            .field("offset", &self.storage.offset)
            .field("snapshot_len", &self.storage.all_keys.len())
            .finish()
    }
}

impl PartialEq for CocoaIndex {
    fn eq(&self, other: &Self) -> bool {
        self.check_same_owner(other);
        self.storage.offset == other.storage.offset
    }
}

impl Eq for CocoaIndex {}

impl PartialOrd for CocoaIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CocoaIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.check_same_owner(other);
        self.storage.offset.cmp(&other.storage.offset)
    }
}

/// Pull iterator over a foreign dictionary, fed by fast-enumeration batches.
pub struct CocoaIterator {
    base: CocoaDictionary,
    state: FastEnumerationState,
    items: [Option<ForeignHandle>; FAST_ENUMERATION_BUFFER_LEN],
    item_index: usize,
    item_count: usize,
    exhausted: bool,
    _nosend: PhantomData<*mut ()>,
}

impl CocoaIterator {
    fn new(base: CocoaDictionary) -> Self {
        Self {
            base,
            state: FastEnumerationState::new(),
            items: Default::default(),
            item_index: 0,
            item_count: 0,
            exhausted: false,
            _nosend: PhantomData,
        }
    }

    /// Next key, refilling the batch buffer when it runs dry.
    pub fn next_key(&mut self) -> Option<ForeignHandle> {
        if self.exhausted {
            return None;
        }
        if self.item_index == self.item_count {
            let resumed = self.state.is_started();
            let guard = self.state.mutations;
            let count = self
                .base
                .object
                .count_by_enumerating(&mut self.state, &mut self.items);
            if resumed {
                assert!(
                    self.state.mutations == guard,
                    "Dictionary mutated during enumeration"
                );
            }
            assert!(count <= self.items.len(), "fast enumeration overran its buffer");
            if count == 0 {
                self.exhausted = true;
                return None;
            }
            self.item_index = 0;
            self.item_count = count;
        }
        let key = self.items[self.item_index]
            .take()
            .unwrap_or_else(|| panic!("fast enumeration reported an unfilled slot"));
        self.item_index += 1;
        Some(key)
    }
}

impl Iterator for CocoaIterator {
    type Item = (ForeignHandle, ForeignHandle);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.next_key()?;
        let value = self.base.value_for_snapshot_key(&key);
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign_dictionary::PlainDictionary;

    fn cocoa(n: u32) -> CocoaDictionary {
        CocoaDictionary::new(
            PlainDictionary::from_pairs((0..n).map(|i| (i.bridge(), format!("v{}", i).bridge())))
                .into_ref(),
        )
    }

    #[test]
    fn iterator_spans_several_batches() {
        let d = cocoa(40);
        let mut seen: Vec<u32> = d.iter().map(|(k, _)| u32::unbridge(&k).unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());

        let mut it = d.iter();
        while it.next().is_some() {}
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn iterator_pairs_keys_with_their_values() {
        for (k, v) in &cocoa(5) {
            let k = u32::unbridge(&k).unwrap();
            assert_eq!(String::unbridge(&v), Some(format!("v{}", k)));
        }
    }

    #[test]
    fn index_walk_visits_every_key_in_snapshot_order() {
        let d = cocoa(6);
        let end = d.end_index();
        let mut i = d.start_index();
        let mut keys = Vec::new();
        while i != end {
            keys.push(d.key_at(&i));
            d.form_index_after(&mut i);
        }
        assert_eq!(keys.len(), 6);
        assert_eq!(i.offset(), 6);
    }

    /// Invariant: advancing in place leaves earlier copies where they were.
    #[test]
    fn index_advance_is_copy_on_write() {
        let d = cocoa(3);
        let start = d.start_index();
        let mut moving = start.clone();
        d.form_index_after(&mut moving);
        assert_eq!(start.offset(), 0);
        assert_eq!(moving.offset(), 1);
        assert!(start < moving);
    }

    #[test]
    fn index_for_key_points_at_the_key() {
        let d = cocoa(4);
        let i = d.index_for_key(&2u32.bridge()).unwrap();
        let (k, v) = d.lookup_index(&i);
        assert_eq!(u32::unbridge(&k), Some(2));
        assert_eq!(String::unbridge(&v), Some("v2".to_string()));
        assert!(d.index_for_key(&99u32.bridge()).is_none());
    }

    #[test]
    fn map_values_converts_every_entry() {
        let d = cocoa(10);
        let native: NativeDictionary<u32, usize> = d.map_values(|v: String| v.len());
        assert_eq!(native.len(), 10);
        assert_eq!(native.get(&3), Some(&2));
    }

    #[test]
    fn try_map_values_reports_untranslatable_entries() {
        let d = CocoaDictionary::new(
            PlainDictionary::from_pairs([(1u32.bridge(), 7i64.bridge())]).into_ref(),
        );
        let err = d
            .try_map_values::<u32, String, String, hashbrown::DefaultHashBuilder, _>(|v| v)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Unbridgeable { .. }));
    }

    #[test]
    fn equality_is_by_content() {
        let a = cocoa(5);
        let b = cocoa(5);
        assert!(a.is_equal(&b));
        assert!(a.is_equal(&a.clone()));
        assert!(!a.is_equal(&cocoa(4)));
    }

    #[test]
    #[should_panic(expected = "Comparing indexes from different dictionaries")]
    fn comparing_indexes_of_different_dictionaries_panics() {
        let a = cocoa(2);
        let b = cocoa(2);
        let _ = a.start_index() == b.start_index();
    }

    #[test]
    #[should_panic(expected = "endIndex")]
    fn advancing_end_index_panics() {
        let d = cocoa(2);
        let end = d.end_index();
        d.index_after(&end);
    }
}
