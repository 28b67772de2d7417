//! Bridged views: how a `NativeDictionary` presents itself to the foreign
//! framework.
//!
//! The representation is chosen once, at bridge time:
//! - `Empty`: the shared empty singleton, for dictionaries with no entries.
//! - `Verbatim`: both key and value types already are foreign objects; the
//!   view reads native storage directly and bridges nothing.
//! - `Deferred`: at least one side needs translation; bridged keys and values
//!   are materialized lazily into two `BridgingCache`s and shared by every
//!   reader of the view.
//!
//! The view owns a clone of the native dictionary, so it pins one storage
//! snapshot. Mutations through any other clone fork the storage instead of
//! touching the snapshot, which keeps published caches valid forever.
//!
//! Since the snapshot cannot change, the age recorded in a fast-enumeration
//! state only fails to match when the caller hands in a state that was
//! written by something else; that is rejected like any other foreign state.

use crate::bridging_buffer::{BridgingBuffer, BridgingCache};
use crate::enumerator::{DictionaryKeyEnumerator, EmptyEnumerator};
use crate::foreign::{Bridge, ForeignHandle};
use crate::foreign_dictionary::{
    FastEnumerationState, ForeignDictionary, ForeignDictionaryRef, ForeignEnumerator,
};
use crate::hash_table::Bucket;
use crate::native_dictionary::NativeDictionary;
use core::any::Any;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::DefaultHashBuilder;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::debug;

static EMPTY: Lazy<Arc<EmptyDictionary>> = Lazy::new(|| Arc::new(EmptyDictionary { _priv: () }));

/// Representation picked by `NativeDictionary::bridge`.
pub enum Bridged<K, V, S = DefaultHashBuilder> {
    Empty(Arc<EmptyDictionary>),
    Verbatim(Arc<VerbatimDictionary<K, V, S>>),
    Deferred(Arc<DeferredDictionary<K, V, S>>),
}

impl<K, V, S> Bridged<K, V, S>
where
    K: Bridge + Eq + Hash + Send + Sync + 'static,
    V: Bridge + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub fn into_foreign(self) -> ForeignDictionaryRef {
        match self {
            Bridged::Empty(d) => d,
            Bridged::Verbatim(d) => d,
            Bridged::Deferred(d) => d,
        }
    }
}

impl<K, V, S> fmt::Debug for Bridged<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bridged::Empty(d) => f.debug_tuple("Empty").field(d).finish(),
            Bridged::Verbatim(d) => f.debug_tuple("Verbatim").field(d).finish(),
            Bridged::Deferred(d) => f.debug_tuple("Deferred").field(d).finish(),
        }
    }
}

/// The shared empty singleton.
pub fn empty_dictionary() -> Arc<EmptyDictionary> {
    Arc::clone(&EMPTY)
}

impl<K, V, S> NativeDictionary<K, V, S>
where
    K: Bridge + Eq + Hash + Send + Sync + 'static,
    V: Bridge + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Choose the foreign representation of this dictionary.
    pub fn bridge(self) -> Bridged<K, V, S> {
        if self.is_empty() {
            debug!("bridging empty dictionary to the shared singleton");
            Bridged::Empty(empty_dictionary())
        } else if K::VERBATIM && V::VERBATIM {
            debug!(count = self.len(), "bridging dictionary verbatim");
            Bridged::Verbatim(Arc::new(VerbatimDictionary { native: self }))
        } else {
            debug!(
                count = self.len(),
                verbatim_keys = K::VERBATIM,
                verbatim_values = V::VERBATIM,
                "bridging dictionary through a deferred view"
            );
            Bridged::Deferred(Arc::new(DeferredDictionary::new(self)))
        }
    }

    /// Bridge and erase the representation.
    pub fn bridged(self) -> ForeignDictionaryRef {
        self.bridge().into_foreign()
    }
}

/// Recover the native dictionary behind a foreign object produced by
/// `bridged()`, without converting anything. `None` for foreign objects
/// that are not views over `NativeDictionary<K, V, S>`.
pub fn adopt_native_storage<K, V, S>(object: &ForeignDictionaryRef) -> Option<NativeDictionary<K, V, S>>
where
    K: Eq + Hash + 'static,
    V: 'static,
    S: BuildHasher + Clone + Default + 'static,
{
    let any = object.as_any();
    if let Some(deferred) = any.downcast_ref::<DeferredDictionary<K, V, S>>() {
        return Some(deferred.native.clone());
    }
    if let Some(verbatim) = any.downcast_ref::<VerbatimDictionary<K, V, S>>() {
        return Some(verbatim.native.clone());
    }
    if any.is::<EmptyDictionary>() {
        return Some(NativeDictionary::with_hasher(S::default()));
    }
    None
}

/// Per-entry access shared by the verbatim and deferred views. A missing
/// cache means that side is verbatim and bridges on the fly.
struct Entries<'a, K, V, S> {
    native: &'a NativeDictionary<K, V, S>,
    keys: Option<&'a BridgingBuffer>,
    values: Option<&'a BridgingBuffer>,
}

impl<'a, K, V, S> Entries<'a, K, V, S>
where
    K: Bridge + Eq + Hash,
    V: Bridge,
    S: BuildHasher,
{
    #[inline]
    fn key(&self, bucket: Bucket) -> ForeignHandle {
        match self.keys {
            Some(cache) => cache.handle(bucket).clone(),
            None => self.native.key_at(bucket).bridge(),
        }
    }

    #[inline]
    fn value(&self, bucket: Bucket) -> ForeignHandle {
        match self.values {
            Some(cache) => cache.handle(bucket).clone(),
            None => self.native.value_at(bucket).bridge(),
        }
    }

    fn get_objects_and_keys(
        &self,
        mut objects: Option<&mut [Option<ForeignHandle>]>,
        mut keys: Option<&mut [Option<ForeignHandle>]>,
        count: usize,
    ) {
        if count == 0 || (objects.is_none() && keys.is_none()) {
            return;
        }
        let n = count.min(self.native.len());
        if let Some(keys) = keys.as_deref() {
            assert!(keys.len() >= n, "key buffer is smaller than the requested count");
        }
        if let Some(objects) = objects.as_deref() {
            assert!(objects.len() >= n, "object buffer is smaller than the requested count");
        }
        for (i, bucket) in self.native.hash_table().iter().take(n).enumerate() {
            if let Some(keys) = keys.as_deref_mut() {
                keys[i] = Some(self.key(bucket));
            }
            if let Some(objects) = objects.as_deref_mut() {
                objects[i] = Some(self.value(bucket));
            }
        }
    }

    fn enumerate(&self, block: &mut dyn FnMut(&ForeignHandle, &ForeignHandle, &mut bool)) {
        let mut stop = false;
        for bucket in self.native.hash_table() {
            let key = self.key(bucket);
            let value = self.value(bucket);
            block(&key, &value, &mut stop);
            if stop {
                return;
            }
        }
    }

    /// Resume position lives in `extra[0]` (bucket offset) and the age the
    /// enumeration started at in `extra[1]`. The pinned snapshot keeps its
    /// age, so a mismatch means the state was not produced by this view.
    fn count_by_enumerating(
        &self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        let table = self.native.hash_table();
        if !state.is_started() {
            state.state = 1;
            state.mutations = self.native.storage_identity();
            state.extra[0] = table.start_bucket().offset();
            state.extra[1] = table.age() as u32 as usize;
        }
        assert!(
            state.mutations == self.native.storage_identity(),
            "fast enumeration state belongs to another collection"
        );
        assert!(
            state.extra[1] == table.age() as u32 as usize,
            "dictionary was mutated while being enumerated"
        );

        if objects.is_empty() {
            return 0;
        }

        let end = table.end_bucket();
        let mut bucket = Bucket::new(state.extra[0]);
        assert!(
            bucket == end || (bucket < end && table.is_occupied(bucket)),
            "Invalid fast enumeration state"
        );
        let mut stored = 0;
        for slot in objects.iter_mut() {
            if bucket == end {
                break;
            }
            *slot = Some(self.key(bucket));
            stored += 1;
            bucket = table.occupied_bucket_after(bucket);
        }
        state.extra[0] = bucket.offset();
        stored
    }
}

/// The shared view of every empty dictionary.
pub struct EmptyDictionary {
    _priv: (),
}

impl fmt::Debug for EmptyDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EmptyDictionary")
    }
}

impl ForeignDictionary for EmptyDictionary {
    fn count(&self) -> usize {
        0
    }

    fn object_for_key(&self, _key: &ForeignHandle) -> Option<ForeignHandle> {
        None
    }

    fn get_objects_and_keys(
        &self,
        _objects: Option<&mut [Option<ForeignHandle>]>,
        _keys: Option<&mut [Option<ForeignHandle>]>,
        _count: usize,
    ) {
    }

    fn enumerate_keys_and_objects(
        &self,
        _block: &mut dyn FnMut(&ForeignHandle, &ForeignHandle, &mut bool),
    ) {
    }

    fn count_by_enumerating(
        &self,
        state: &mut FastEnumerationState,
        _objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        if !state.is_started() {
            state.state = 1;
            state.mutations = self as *const Self as usize;
        }
        0
    }

    fn key_enumerator(&self) -> Box<dyn ForeignEnumerator> {
        Box::new(EmptyEnumerator::new())
    }

    fn copy(self: Arc<Self>) -> ForeignDictionaryRef {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// View over a dictionary whose keys and values are foreign objects already.
pub struct VerbatimDictionary<K, V, S = DefaultHashBuilder> {
    native: NativeDictionary<K, V, S>,
}

impl<K, V, S> VerbatimDictionary<K, V, S> {
    pub fn native(&self) -> &NativeDictionary<K, V, S> {
        &self.native
    }
}

impl<K, V, S> VerbatimDictionary<K, V, S>
where
    K: Bridge + Eq + Hash,
    V: Bridge,
    S: BuildHasher,
{
    fn entries(&self) -> Entries<'_, K, V, S> {
        Entries {
            native: &self.native,
            keys: None,
            values: None,
        }
    }
}

impl<K, V, S> fmt::Debug for VerbatimDictionary<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerbatimDictionary")
            .field("count", &self.native.len())
            .finish()
    }
}

impl<K, V, S> ForeignDictionary for VerbatimDictionary<K, V, S>
where
    K: Bridge + Eq + Hash + Send + Sync + 'static,
    V: Bridge + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn count(&self) -> usize {
        self.native.len()
    }

    fn object_for_key(&self, key: &ForeignHandle) -> Option<ForeignHandle> {
        let native_key = K::unbridge(key)?;
        let bucket = self.native.find(&native_key)?;
        Some(self.entries().value(bucket))
    }

    fn get_objects_and_keys(
        &self,
        objects: Option<&mut [Option<ForeignHandle>]>,
        keys: Option<&mut [Option<ForeignHandle>]>,
        count: usize,
    ) {
        self.entries().get_objects_and_keys(objects, keys, count)
    }

    fn enumerate_keys_and_objects(
        &self,
        block: &mut dyn FnMut(&ForeignHandle, &ForeignHandle, &mut bool),
    ) {
        self.entries().enumerate(block)
    }

    fn count_by_enumerating(
        &self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        self.entries().count_by_enumerating(state, objects)
    }

    fn key_enumerator(&self) -> Box<dyn ForeignEnumerator> {
        Box::new(DictionaryKeyEnumerator::new(self.native.clone(), None))
    }

    fn copy(self: Arc<Self>) -> ForeignDictionaryRef {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// View that bridges lazily and caches bridged keys and values.
pub struct DeferredDictionary<K, V, S = DefaultHashBuilder> {
    bridged_keys: BridgingCache,
    bridged_values: BridgingCache,
    native: NativeDictionary<K, V, S>,
}

impl<K, V, S> DeferredDictionary<K, V, S>
where
    K: Bridge + Eq + Hash,
    V: Bridge,
    S: BuildHasher,
{
    pub fn new(native: NativeDictionary<K, V, S>) -> Self {
        assert!(!native.is_empty(), "empty dictionaries bridge to the singleton");
        debug_assert!(!(K::VERBATIM && V::VERBATIM));
        Self {
            bridged_keys: BridgingCache::new(),
            bridged_values: BridgingCache::new(),
            native,
        }
    }

    pub fn native(&self) -> &NativeDictionary<K, V, S> {
        &self.native
    }

    /// Published key cache, built on first use; `None` for verbatim keys.
    pub fn bridge_keys(&self) -> Option<&Arc<BridgingBuffer>> {
        if K::VERBATIM {
            return None;
        }
        let native = &self.native;
        Some(self.bridged_keys.get_or_build(|| {
            BridgingBuffer::build(native.hash_table(), |bucket| native.key_at(bucket).bridge())
        }))
    }

    /// Published value cache, built on first use; `None` for verbatim values.
    pub fn bridge_values(&self) -> Option<&Arc<BridgingBuffer>> {
        if V::VERBATIM {
            return None;
        }
        let native = &self.native;
        Some(self.bridged_values.get_or_build(|| {
            BridgingBuffer::build(native.hash_table(), |bucket| native.value_at(bucket).bridge())
        }))
    }

    /// Caches that are already published, without building anything.
    pub fn published_keys(&self) -> Option<&Arc<BridgingBuffer>> {
        self.bridged_keys.get()
    }

    pub fn published_values(&self) -> Option<&Arc<BridgingBuffer>> {
        self.bridged_values.get()
    }

    fn entries(&self) -> Entries<'_, K, V, S> {
        Entries {
            native: &self.native,
            keys: self.bridge_keys().map(|b| &**b),
            values: self.bridge_values().map(|b| &**b),
        }
    }
}

impl<K, V, S> fmt::Debug for DeferredDictionary<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredDictionary")
            .field("count", &self.native.len())
            .field("bridged_keys", &self.bridged_keys)
            .field("bridged_values", &self.bridged_values)
            .finish()
    }
}

impl<K, V, S> ForeignDictionary for DeferredDictionary<K, V, S>
where
    K: Bridge + Eq + Hash + Send + Sync + 'static,
    V: Bridge + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn count(&self) -> usize {
        self.native.len()
    }

    fn object_for_key(&self, key: &ForeignHandle) -> Option<ForeignHandle> {
        let native_key = K::unbridge(key)?;
        let bucket = self.native.find(&native_key)?;
        Some(match self.bridge_values() {
            Some(values) => values.handle(bucket).clone(),
            None => self.native.value_at(bucket).bridge(),
        })
    }

    fn get_objects_and_keys(
        &self,
        objects: Option<&mut [Option<ForeignHandle>]>,
        keys: Option<&mut [Option<ForeignHandle>]>,
        count: usize,
    ) {
        if count == 0 {
            return;
        }
        self.entries().get_objects_and_keys(objects, keys, count)
    }

    fn enumerate_keys_and_objects(
        &self,
        block: &mut dyn FnMut(&ForeignHandle, &ForeignHandle, &mut bool),
    ) {
        self.entries().enumerate(block)
    }

    fn count_by_enumerating(
        &self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        // Only keys are enumerated, so only the key cache is built.
        Entries {
            native: &self.native,
            keys: self.bridge_keys().map(|b| &**b),
            values: None,
        }
        .count_by_enumerating(state, objects)
    }

    fn key_enumerator(&self) -> Box<dyn ForeignEnumerator> {
        Box::new(DictionaryKeyEnumerator::new(
            self.native.clone(),
            self.bridge_keys().cloned(),
        ))
    }

    fn copy(self: Arc<Self>) -> ForeignDictionaryRef {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
