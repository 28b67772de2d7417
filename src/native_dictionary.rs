//! NativeDictionary: copy-on-write open-addressing dictionary.
//!
//! Storage is a set of parallel arrays (hashes, keys, values) aligned with a
//! `HashTable` occupancy bitmap. The storage is shared by reference between
//! clones of a dictionary and between a dictionary and its bridged views;
//! any mutation through a shared storage forks it first, so a snapshot that
//! a view holds is never mutated underneath it.

use crate::hash_table::{fresh_age, Bucket, HashTable};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::DefaultHashBuilder;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InsertError {
    #[error("key is already present in the dictionary")]
    DuplicateKey,
}

#[derive(Clone)]
pub(crate) struct Storage<K, V> {
    table: HashTable,
    hashes: Box<[u64]>,
    keys: Box<[Option<K>]>,
    values: Box<[Option<V>]>,
    count: usize,
}

impl<K, V> Storage<K, V> {
    fn with_table(table: HashTable) -> Self {
        let n = table.bucket_count();
        Self {
            table,
            hashes: vec![0u64; n].into_boxed_slice(),
            keys: (0..n).map(|_| None).collect(),
            values: (0..n).map(|_| None).collect(),
            count: 0,
        }
    }

    #[inline]
    fn key(&self, bucket: Bucket) -> &K {
        self.keys[bucket.offset()]
            .as_ref()
            .expect("occupied bucket must hold a key")
    }

    #[inline]
    fn value(&self, bucket: Bucket) -> &V {
        self.values[bucket.offset()]
            .as_ref()
            .expect("occupied bucket must hold a value")
    }

    fn probe_vacant(&self, hash: u64) -> Bucket {
        let mut bucket = self.table.ideal_bucket(hash);
        while self.table.is_occupied(bucket) {
            bucket = self.table.wrap_next(bucket);
        }
        bucket
    }

    fn write(&mut self, bucket: Bucket, hash: u64, key: K, value: V) {
        let o = bucket.offset();
        self.table.mark_occupied(bucket);
        self.hashes[o] = hash;
        self.keys[o] = Some(key);
        self.values[o] = Some(value);
        self.count += 1;
    }

    /// Remove the entry at `bucket` and close the probe gap by shifting
    /// later entries of the same run backward.
    fn delete(&mut self, bucket: Bucket) -> (K, V) {
        let key = self.keys[bucket.offset()]
            .take()
            .expect("occupied bucket must hold a key");
        let value = self.values[bucket.offset()]
            .take()
            .expect("occupied bucket must hold a value");
        self.table.mark_vacant(bucket);
        self.count -= 1;

        let mask = self.table.bucket_count() - 1;
        let mut hole = bucket;
        let mut probe = self.table.wrap_next(hole);
        while self.table.is_occupied(probe) {
            let ideal = self.table.ideal_bucket(self.hashes[probe.offset()]);
            let from_ideal = probe.offset().wrapping_sub(ideal.offset()) & mask;
            let from_hole = probe.offset().wrapping_sub(hole.offset()) & mask;
            // Entries whose ideal bucket lies cyclically in (hole, probe] stay.
            if from_ideal >= from_hole {
                let (h, p) = (hole.offset(), probe.offset());
                self.hashes[h] = self.hashes[p];
                self.keys[h] = self.keys[p].take();
                self.values[h] = self.values[p].take();
                self.table.mark_vacant(probe);
                self.table.mark_occupied(hole);
                hole = probe;
            }
            probe = self.table.wrap_next(probe);
        }
        (key, value)
    }
}

pub struct NativeDictionary<K, V, S = DefaultHashBuilder> {
    storage: Arc<Storage<K, V>>,
    hasher: S,
}

/// Position of an entry in a `NativeDictionary`, valid only while the
/// dictionary's age is unchanged. Ages are drawn from a global sequence, so
/// an index never validates against a dictionary that has diverged from the
/// one that minted it.
#[derive(Copy, Clone, Debug)]
pub struct NativeIndex {
    bucket: Bucket,
    age: i32,
}

impl NativeIndex {
    #[inline]
    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    #[inline]
    pub fn age(&self) -> i32 {
        self.age
    }

    #[inline]
    fn check_same_owner(&self, other: &NativeIndex) {
        assert!(
            self.age == other.age,
            "Comparing indexes from different dictionaries"
        );
    }
}

impl PartialEq for NativeIndex {
    fn eq(&self, other: &Self) -> bool {
        self.check_same_owner(other);
        self.bucket == other.bucket
    }
}

impl Eq for NativeIndex {}

impl PartialOrd for NativeIndex {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NativeIndex {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.check_same_owner(other);
        self.bucket.cmp(&other.bucket)
    }
}

impl<K, V> NativeDictionary<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, Default::default())
    }
}

impl<K, V> Default for NativeDictionary<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S: Clone> Clone for NativeDictionary<K, V, S> {
    /// Shares storage; the first mutation of either copy forks it.
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            hasher: self.hasher.clone(),
        }
    }
}

/// Iterator over entries in storage order.
pub struct Iter<'a, K, V> {
    storage: &'a Storage<K, V>,
    next: Bucket,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.next == self.storage.table.end_bucket() {
            return None;
        }
        let bucket = self.next;
        self.next = self.storage.table.occupied_bucket_after(bucket);
        Some((self.storage.key(bucket), self.storage.value(bucket)))
    }
}

impl<K, V, S> NativeDictionary<K, V, S> {
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.count == 0
    }

    /// Entries this storage holds before the next insert reallocates.
    pub fn capacity(&self) -> usize {
        self.storage.table.capacity()
    }

    #[inline]
    pub fn hash_table(&self) -> &HashTable {
        &self.storage.table
    }

    #[inline]
    pub fn age(&self) -> i32 {
        self.storage.table.age()
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Stable identity of the current storage; changes on fork or growth.
    #[inline]
    pub fn storage_identity(&self) -> usize {
        Arc::as_ptr(&self.storage) as *const () as usize
    }

    /// Whether two dictionaries currently share one storage.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    #[inline]
    pub(crate) fn key_at(&self, bucket: Bucket) -> &K {
        self.storage.key(bucket)
    }

    #[inline]
    pub(crate) fn value_at(&self, bucket: Bucket) -> &V {
        self.storage.value(bucket)
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            storage: &self.storage,
            next: self.storage.table.start_bucket(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    pub fn start_index(&self) -> NativeIndex {
        NativeIndex {
            bucket: self.storage.table.start_bucket(),
            age: self.age(),
        }
    }

    pub fn end_index(&self) -> NativeIndex {
        NativeIndex {
            bucket: self.storage.table.end_bucket(),
            age: self.age(),
        }
    }

    /// Panics unless `index` addresses a live entry of this dictionary.
    fn validate(&self, index: &NativeIndex) {
        let table = &self.storage.table;
        assert!(
            index.age == table.age(),
            "Attempting to access Dictionary elements using an invalid index"
        );
        assert!(
            index.bucket != table.end_bucket(),
            "Attempting to access Dictionary elements using endIndex"
        );
        assert!(
            table.is_valid(index.bucket) && table.is_occupied(index.bucket),
            "Attempting to access Dictionary elements using an invalid index"
        );
    }

    pub fn index_after(&self, index: &NativeIndex) -> NativeIndex {
        self.validate(index);
        NativeIndex {
            bucket: self.storage.table.occupied_bucket_after(index.bucket),
            age: index.age,
        }
    }

    pub fn entry_at(&self, index: &NativeIndex) -> (&K, &V) {
        self.validate(index);
        (
            self.storage.key(index.bucket),
            self.storage.value(index.bucket),
        )
    }
}

impl<K, V, S> NativeDictionary<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            storage: Arc::new(Storage::with_table(HashTable::with_capacity(capacity))),
            hasher,
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    /// Bucket holding `q`, or `None`.
    pub fn find<Q>(&self, q: &Q) -> Option<Bucket>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        if self.is_empty() {
            return None;
        }
        let hash = self.make_hash(q);
        let s = &*self.storage;
        let mut bucket = s.table.ideal_bucket(hash);
        while s.table.is_occupied(bucket) {
            if s.hashes[bucket.offset()] == hash && s.key(bucket).borrow() == q {
                return Some(bucket);
            }
            bucket = s.table.wrap_next(bucket);
        }
        None
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).is_some()
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).map(|b| self.storage.value(b))
    }

    pub fn get_key_value<Q>(&self, q: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q)
            .map(|b| (self.storage.key(b), self.storage.value(b)))
    }

    pub fn index_for_key<Q>(&self, q: &Q) -> Option<NativeIndex>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).map(|bucket| NativeIndex {
            bucket,
            age: self.age(),
        })
    }
}

impl<K, V, S> NativeDictionary<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher,
{
    fn storage_mut(&mut self) -> &mut Storage<K, V> {
        if Arc::strong_count(&self.storage) > 1 {
            trace!(count = self.storage.count, "forking shared dictionary storage");
        }
        Arc::make_mut(&mut self.storage)
    }

    /// Move every entry into a new storage sized for `capacity`.
    fn resize(&mut self, capacity: usize) {
        let table =
            HashTable::with_bucket_count(HashTable::bucket_count_for(capacity), fresh_age());
        trace!(
            from = self.storage.table.bucket_count(),
            to = table.bucket_count(),
            "growing dictionary storage"
        );
        let mut fresh = Storage::with_table(table);
        match Arc::get_mut(&mut self.storage) {
            Some(owned) => {
                for o in 0..owned.keys.len() {
                    if let (Some(key), Some(value)) = (owned.keys[o].take(), owned.values[o].take()) {
                        let hash = owned.hashes[o];
                        let target = fresh.probe_vacant(hash);
                        fresh.write(target, hash, key, value);
                    }
                }
            }
            None => {
                let shared = &*self.storage;
                for bucket in shared.table.iter() {
                    let hash = shared.hashes[bucket.offset()];
                    let target = fresh.probe_vacant(hash);
                    fresh.write(
                        target,
                        hash,
                        shared.key(bucket).clone(),
                        shared.value(bucket).clone(),
                    );
                }
            }
        }
        self.storage = Arc::new(fresh);
    }

    /// Ensure room for `additional` more entries without reallocating.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.len().saturating_add(additional);
        if needed > self.capacity() {
            let doubled = self.capacity().saturating_mul(2);
            self.resize(needed.max(doubled));
        }
    }

    fn insert_absent(&mut self, hash: u64, key: K, value: V) -> Bucket {
        self.reserve(1);
        let s = self.storage_mut();
        let bucket = s.probe_vacant(hash);
        s.write(bucket, hash, key, value);
        s.table.bump_age();
        bucket
    }

    /// Insert or replace; returns the previous value for `key`.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.find(&key) {
            Some(bucket) => {
                let s = self.storage_mut();
                s.values[bucket.offset()].replace(value)
            }
            None => {
                let hash = self.make_hash(&key);
                self.insert_absent(hash, key, value);
                None
            }
        }
    }

    /// Insert a key known to be new; duplicates are rejected and the
    /// dictionary is left unchanged.
    pub fn insert_new(&mut self, key: K, value: V) -> Result<Bucket, InsertError> {
        if self.contains_key(&key) {
            return Err(InsertError::DuplicateKey);
        }
        let hash = self.make_hash(&key);
        Ok(self.insert_absent(hash, key, value))
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let bucket = self.find(q)?;
        self.storage_mut().values[bucket.offset()].as_mut()
    }

    pub fn remove<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let bucket = self.find(q)?;
        let s = self.storage_mut();
        let removed = s.delete(bucket);
        s.table.bump_age();
        Some(removed)
    }

    /// Remove the entry at `index`. Every outstanding index is invalidated.
    pub fn remove_at(&mut self, index: &NativeIndex) -> (K, V) {
        self.validate(index);
        let s = self.storage_mut();
        let removed = s.delete(index.bucket);
        s.table.bump_age();
        removed
    }

    /// Drop every entry, releasing the storage. Outstanding indexes become
    /// invalid.
    pub fn clear(&mut self) {
        self.storage = Arc::new(Storage::with_table(HashTable::with_bucket_count(1, fresh_age())));
    }
}

impl<K, V, S> fmt::Debug for NativeDictionary<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> PartialEq for NativeDictionary<K, V, S>
where
    K: Eq + Hash,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.shares_storage_with(other) {
            return true;
        }
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, S> Extend<(K, V)> for NativeDictionary<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for NativeDictionary<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut d = Self::with_hasher(S::default());
        d.extend(iter);
        d
    }
}
