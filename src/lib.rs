//! bridged-dict: a copy-on-write hash dictionary that presents itself to a
//! foreign object framework's dictionary protocol, and consumes that
//! framework's dictionaries as if they were native.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep native storage authoritative and translate to foreign
//!   objects lazily, at most once per entry per storage snapshot.
//! - Layers:
//!   - HashTable: occupancy bitmap plus a mutation age over a fixed
//!     bucket count. Keys, values and both bridging caches are parallel
//!     arrays addressed by the same `Bucket` offsets.
//!   - NativeDictionary<K, V, S>: linear-probing dictionary over shared
//!     storage; mutation of shared storage forks it first.
//!   - Bridged views: `bridged()` picks the empty singleton, a verbatim
//!     view (keys and values already are foreign objects) or a deferred
//!     view that builds bridged key and value caches on demand.
//!   - CocoaDictionary: the other direction. Wraps a foreign-supplied
//!     dictionary behind count/lookup/index APIs; indexes are key
//!     snapshots plus an offset.
//!   - DictionaryVariant: one read API over either backing.
//!
//! Constraints
//! - A published bridging cache is immutable. Views pin a clone of the
//!   native dictionary, so the snapshot a cache was built from is never
//!   mutated.
//! - Cache publication is first-writer-wins through a single atomic
//!   initialize-if-absent; racing builders may duplicate work but no
//!   reader sees a partially built cache.
//! - Enumeration cursors (`FastEnumerationState`, enumerators, iterators)
//!   are single-threaded. Enumerators and iterators are `!Send`.
//!
//! Failure model
//! - Invalid indexes (wrong owner, past the end, stale after mutation)
//!   and mutation detected during fast enumeration panic immediately.
//! - A foreign key with no native counterpart reads as absent from
//!   `object_for_key`, indistinguishable from a missing key.
//! - Whole-dictionary conversion (`try_map_values`) reports untranslatable
//!   entries as `BridgeError`.
//!
//! Age semantics
//! - Ages come from one global sequence. New storage, inserting a new
//!   key, removing a key, growing and clearing each take the next age;
//!   replacing a value in place does not. A copy-on-write fork keeps the
//!   age, so clones that diverge structurally never share an age again.
//!   A `NativeIndex` remembers the age it was minted at and is rejected
//!   once the age moves.
//!
//! Notes and non-goals
//! - Verbatim views read native storage through the protocol rather than
//!   reinterpreting its memory.
//! - No foreign mutable dictionary: bridged views are immutable and
//!   `copy()` returns the same object.

pub mod bridged;
pub mod bridging_buffer;
pub mod cocoa_dictionary;
pub mod enumerator;
pub mod foreign;
pub mod foreign_dictionary;
pub mod hash_table;
pub mod index;
pub mod native_dictionary;
mod native_dictionary_proptest;

// Public surface
pub use bridged::{adopt_native_storage, empty_dictionary, Bridged};
pub use bridging_buffer::{BridgingBuffer, BridgingCache};
pub use cocoa_dictionary::{CocoaDictionary, CocoaIndex, FAST_ENUMERATION_BUFFER_LEN};
pub use foreign::{Boxed, Bridge, BridgeError, ForeignHandle, ForeignObject};
pub use foreign_dictionary::{
    FastEnumerationState, ForeignDictionary, ForeignDictionaryRef, ForeignEnumerator,
    PlainDictionary,
};
pub use hash_table::{Bucket, HashTable};
pub use index::{DictionaryIndex, DictionaryVariant};
pub use native_dictionary::{InsertError, NativeDictionary, NativeIndex};
