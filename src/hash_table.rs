//! HashTable: occupancy bitmap and mutation age over a fixed bucket count.
//!
//! The table owns no payload. Native keys, native values and both bridging
//! caches are parallel arrays indexed by the same `Bucket` offsets, so the
//! bitmap here is the single source of truth for which slots hold an entry.

use core::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

const WORD_BITS: usize = u64::BITS as usize;

// Every new storage and every structural mutation takes the next age from
// one global sequence, so two dictionaries that diverged from a common clone
// never reach the same age again.
static AGE_SEED: AtomicI32 = AtomicI32::new(0x2545_f491);
const AGE_SEED_STEP: i32 = 0x3c6e_f372;

/// Next age of the global sequence. Wraps; distinct for 2^31 draws.
#[inline]
pub(crate) fn fresh_age() -> i32 {
    AGE_SEED.fetch_add(AGE_SEED_STEP, Ordering::Relaxed)
}

/// Offset of a slot in a hash table and in every array aligned with it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bucket {
    offset: usize,
}

impl Bucket {
    #[inline]
    pub const fn new(offset: usize) -> Self {
        Bucket { offset }
    }

    #[inline]
    pub const fn offset(self) -> usize {
        self.offset
    }
}

#[derive(Clone)]
pub struct HashTable {
    words: Box<[u64]>,
    bucket_mask: usize,
    age: i32,
}

impl HashTable {
    /// Smallest power-of-two bucket count whose 3/4 load bound admits
    /// `capacity` entries.
    pub fn bucket_count_for(capacity: usize) -> usize {
        let mut buckets = 1usize;
        while Self::max_load(buckets) < capacity {
            buckets = buckets
                .checked_mul(2)
                .expect("dictionary capacity overflow");
        }
        buckets
    }

    #[inline]
    fn max_load(bucket_count: usize) -> usize {
        bucket_count / 4 * 3 + (bucket_count % 4) * 3 / 4
    }

    /// Empty table sized for at least `capacity` entries, with a fresh age.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_bucket_count(Self::bucket_count_for(capacity), fresh_age())
    }

    pub(crate) fn with_bucket_count(bucket_count: usize, age: i32) -> Self {
        assert!(
            bucket_count.is_power_of_two(),
            "bucket count must be a power of two"
        );
        let words = vec![0u64; bucket_count.div_ceil(WORD_BITS)].into_boxed_slice();
        Self {
            words,
            bucket_mask: bucket_count - 1,
            age,
        }
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.bucket_mask + 1
    }

    /// Number of entries this table may hold before storage must grow.
    #[inline]
    pub fn capacity(&self) -> usize {
        Self::max_load(self.bucket_count())
    }

    #[inline]
    pub fn age(&self) -> i32 {
        self.age
    }

    #[inline]
    pub(crate) fn bump_age(&mut self) {
        self.age = fresh_age();
    }

    #[inline]
    pub(crate) fn ideal_bucket(&self, hash: u64) -> Bucket {
        Bucket::new(hash as usize & self.bucket_mask)
    }

    /// Next bucket in probe order, wrapping around the end of the table.
    #[inline]
    pub(crate) fn wrap_next(&self, bucket: Bucket) -> Bucket {
        Bucket::new((bucket.offset + 1) & self.bucket_mask)
    }

    #[inline]
    pub(crate) fn is_valid(&self, bucket: Bucket) -> bool {
        bucket.offset < self.bucket_count()
    }

    #[inline]
    pub fn is_occupied(&self, bucket: Bucket) -> bool {
        assert!(self.is_valid(bucket), "bucket out of range");
        let (word, bit) = (bucket.offset / WORD_BITS, bucket.offset % WORD_BITS);
        self.words[word] & (1u64 << bit) != 0
    }

    pub(crate) fn mark_occupied(&mut self, bucket: Bucket) {
        debug_assert!(!self.is_occupied(bucket));
        self.words[bucket.offset / WORD_BITS] |= 1u64 << (bucket.offset % WORD_BITS);
    }

    pub(crate) fn mark_vacant(&mut self, bucket: Bucket) {
        debug_assert!(self.is_occupied(bucket));
        self.words[bucket.offset / WORD_BITS] &= !(1u64 << (bucket.offset % WORD_BITS));
    }

    /// First occupied bucket, or `end_bucket()` when the table is empty.
    #[inline]
    pub fn start_bucket(&self) -> Bucket {
        self.occupied_bucket_at_or_after(0)
    }

    /// Sentinel one past the last bucket.
    #[inline]
    pub fn end_bucket(&self) -> Bucket {
        Bucket::new(self.bucket_count())
    }

    /// Next occupied bucket strictly after `bucket`, or `end_bucket()`.
    #[inline]
    pub fn occupied_bucket_after(&self, bucket: Bucket) -> Bucket {
        debug_assert!(bucket.offset < self.bucket_count());
        self.occupied_bucket_at_or_after(bucket.offset + 1)
    }

    fn occupied_bucket_at_or_after(&self, offset: usize) -> Bucket {
        let end = self.bucket_count();
        if offset >= end {
            return self.end_bucket();
        }
        let mut word_index = offset / WORD_BITS;
        let mut word = self.words[word_index] & (!0u64 << (offset % WORD_BITS));
        loop {
            if word != 0 {
                let found = word_index * WORD_BITS + word.trailing_zeros() as usize;
                return if found < end {
                    Bucket::new(found)
                } else {
                    self.end_bucket()
                };
            }
            word_index += 1;
            if word_index == self.words.len() {
                return self.end_bucket();
            }
            word = self.words[word_index];
        }
    }

    pub fn occupied_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Occupied buckets in storage order.
    pub fn iter(&self) -> OccupiedBuckets<'_> {
        OccupiedBuckets {
            table: self,
            next: self.start_bucket(),
        }
    }
}

#[cfg(feature = "bench_internal")]
impl HashTable {
    /// Table of `bucket_count` buckets with the given offsets occupied.
    ///
    /// Lets benches lay out occupancy patterns that hashing alone would not
    /// produce.
    pub fn from_occupied(bucket_count: usize, occupied: impl IntoIterator<Item = usize>) -> Self {
        let mut table = Self::with_bucket_count(bucket_count, fresh_age());
        for offset in occupied {
            let bucket = Bucket::new(offset);
            assert!(table.is_valid(bucket), "bucket out of range");
            if !table.is_occupied(bucket) {
                table.mark_occupied(bucket);
            }
        }
        table
    }
}

impl fmt::Debug for HashTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("bucket_count", &self.bucket_count())
            .field("occupied", &self.occupied_count())
            .field("age", &self.age)
            .finish()
    }
}

impl<'a> IntoIterator for &'a HashTable {
    type Item = Bucket;
    type IntoIter = OccupiedBuckets<'a>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the occupied buckets of a `HashTable`.
pub struct OccupiedBuckets<'a> {
    table: &'a HashTable,
    next: Bucket,
}

impl<'a> Iterator for OccupiedBuckets<'a> {
    type Item = Bucket;
    #[inline]
    fn next(&mut self) -> Option<Bucket> {
        if self.next == self.table.end_bucket() {
            return None;
        }
        let bucket = self.next;
        self.next = self.table.occupied_bucket_after(bucket);
        Some(bucket)
    }
}
