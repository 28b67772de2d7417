//! Key enumerators handed out by bridged views.

use crate::bridging_buffer::BridgingBuffer;
use crate::foreign::{Bridge, ForeignHandle};
use crate::foreign_dictionary::{FastEnumerationState, ForeignEnumerator};
use crate::hash_table::Bucket;
use crate::native_dictionary::NativeDictionary;
use std::marker::PhantomData;
use std::sync::Arc;

/// Walks the keys of one storage snapshot in bucket order.
///
/// `next_object` and `count_by_enumerating` advance the same position, and
/// fast enumeration hands out a single key per call so that a caller can
/// switch between the two at any point without skipping keys.
pub struct DictionaryKeyEnumerator<K, V, S> {
    base: NativeDictionary<K, V, S>,
    bridged_keys: Option<Arc<BridgingBuffer>>,
    next_bucket: Bucket,
    end_bucket: Bucket,
    // Single-threaded cursor.
    _nosend: PhantomData<*mut ()>,
}

impl<K, V, S> DictionaryKeyEnumerator<K, V, S> {
    /// `bridged_keys` is the view's published key cache, or `None` when
    /// keys bridge verbatim.
    pub fn new(base: NativeDictionary<K, V, S>, bridged_keys: Option<Arc<BridgingBuffer>>) -> Self {
        let table = base.hash_table();
        let (next_bucket, end_bucket) = (table.start_bucket(), table.end_bucket());
        Self {
            base,
            bridged_keys,
            next_bucket,
            end_bucket,
            _nosend: PhantomData,
        }
    }
}

impl<K: Bridge, V, S> ForeignEnumerator for DictionaryKeyEnumerator<K, V, S> {
    fn next_object(&mut self) -> Option<ForeignHandle> {
        if self.next_bucket == self.end_bucket {
            return None;
        }
        let bucket = self.next_bucket;
        self.next_bucket = self.base.hash_table().occupied_bucket_after(bucket);
        Some(match &self.bridged_keys {
            Some(cache) => cache.handle(bucket).clone(),
            None => self.base.key_at(bucket).bridge(),
        })
    }

    fn count_by_enumerating(
        &mut self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        if !state.is_started() {
            state.state = 1;
            state.mutations = self.base.storage_identity();
        }
        assert!(
            state.mutations == self.base.storage_identity(),
            "fast enumeration state belongs to another collection"
        );
        let Some(slot) = objects.first_mut() else {
            return 0;
        };
        match self.next_object() {
            Some(key) => {
                *slot = Some(key);
                1
            }
            None => 0,
        }
    }
}

/// Enumerator of the empty singleton.
pub struct EmptyEnumerator {
    _nosend: PhantomData<*mut ()>,
}

impl EmptyEnumerator {
    pub fn new() -> Self {
        Self {
            _nosend: PhantomData,
        }
    }
}

impl Default for EmptyEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ForeignEnumerator for EmptyEnumerator {
    fn next_object(&mut self) -> Option<ForeignHandle> {
        None
    }

    fn count_by_enumerating(
        &mut self,
        state: &mut FastEnumerationState,
        _objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        if !state.is_started() {
            state.state = 1;
        }
        0
    }
}
