//! Bridging buffers: per-bucket caches of bridged foreign handles.
//!
//! A `BridgingBuffer` is built off to the side from one hash-table snapshot
//! and only becomes visible once complete, through a `BridgingCache` slot
//! that publishes with a single compare-and-set. Racing builders may each
//! build a full buffer; the first to publish wins and the others drop theirs,
//! so no reader can observe a partially filled buffer.

use crate::foreign::ForeignHandle;
use crate::hash_table::{Bucket, HashTable};
use core::fmt;
use once_cell::race::OnceBox;
use std::sync::Arc;
use tracing::trace;

/// One optional foreign handle per bucket of the snapshot it was built from.
pub struct BridgingBuffer {
    slots: Box<[Option<ForeignHandle>]>,
    age: i32,
}

impl BridgingBuffer {
    /// All-empty buffer aligned with `table`'s bucket space.
    pub fn allocate(table: &HashTable) -> Self {
        Self {
            slots: (0..table.bucket_count()).map(|_| None).collect(),
            age: table.age(),
        }
    }

    /// Bridge every occupied bucket of `table` with `bridge`.
    pub fn build<F>(table: &HashTable, mut bridge: F) -> Self
    where
        F: FnMut(Bucket) -> ForeignHandle,
    {
        let mut buffer = Self::allocate(table);
        for bucket in table {
            buffer.initialize(bucket, bridge(bucket));
        }
        buffer
    }

    /// Write-once initialization of `bucket`.
    pub fn initialize(&mut self, bucket: Bucket, handle: ForeignHandle) {
        let slot = &mut self.slots[bucket.offset()];
        assert!(slot.is_none(), "bridging buffer slot initialized twice");
        *slot = Some(handle);
    }

    pub fn get(&self, bucket: Bucket) -> Option<&ForeignHandle> {
        self.slots.get(bucket.offset()).and_then(Option::as_ref)
    }

    /// Handle cached for an occupied bucket of the source snapshot.
    pub fn handle(&self, bucket: Bucket) -> &ForeignHandle {
        self.get(bucket)
            .unwrap_or_else(|| panic!("bridging buffer has no handle for bucket {}", bucket.offset()))
    }

    pub fn bucket_count(&self) -> usize {
        self.slots.len()
    }

    /// Age of the hash table this buffer was built from.
    pub fn age(&self) -> i32 {
        self.age
    }

    pub fn initialized_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl fmt::Debug for BridgingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgingBuffer")
            .field("bucket_count", &self.bucket_count())
            .field("initialized", &self.initialized_count())
            .field("age", &self.age)
            .finish()
    }
}

/// Lazily published, shared reference to a `BridgingBuffer`.
pub struct BridgingCache {
    slot: OnceBox<Arc<BridgingBuffer>>,
}

impl BridgingCache {
    pub const fn new() -> Self {
        Self {
            slot: OnceBox::new(),
        }
    }

    pub fn get(&self) -> Option<&Arc<BridgingBuffer>> {
        self.slot.get()
    }

    /// Publish `buffer` unless another one is already in place; returns the
    /// buffer every reader sees from now on.
    pub fn publish(&self, buffer: BridgingBuffer) -> &Arc<BridgingBuffer> {
        let ours = Arc::new(buffer);
        let published = self.slot.get_or_init(|| Box::new(Arc::clone(&ours)));
        if Arc::ptr_eq(published, &ours) {
            trace!(bucket_count = ours.bucket_count(), "published bridging buffer");
        } else {
            trace!(
                bucket_count = ours.bucket_count(),
                "discarding bridging buffer that lost the publish race"
            );
        }
        published
    }

    /// The published buffer, building and publishing one first if needed.
    pub fn get_or_build<F>(&self, build: F) -> &Arc<BridgingBuffer>
    where
        F: FnOnce() -> BridgingBuffer,
    {
        if let Some(buffer) = self.get() {
            return buffer;
        }
        self.publish(build())
    }
}

impl Default for BridgingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BridgingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(buffer) => f.debug_tuple("BridgingCache").field(buffer).finish(),
            None => f.write_str("BridgingCache(<unbuilt>)"),
        }
    }
}
