// Bridged view test suite.
//
// Invariants exercised:
// - Representation: empty dictionaries share one singleton; verbatim key and
//   value types bridge without caches; anything else bridges deferred.
// - Lookup: bridged lookup of a present key yields the bridged native value;
//   missing and untranslatable keys read as absent.
// - Order stability: bulk export returns keys in one fixed bucket order.
// - Snapshot isolation: mutating the native dictionary after bridging leaves
//   the view unchanged.
// - Cache publication: concurrent readers of one view converge on a single
//   key cache.
mod support;

use bridged_dict::{
    adopt_native_storage, Boxed, Bridge, Bridged, FastEnumerationState, ForeignHandle,
    NativeDictionary,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use support::drain_keys;

fn abc() -> NativeDictionary<String, i64> {
    [("a", 1), ("b", 2), ("c", 3)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn strings(handles: &[Option<ForeignHandle>]) -> Vec<String> {
    handles
        .iter()
        .map(|h| String::unbridge(h.as_ref().expect("filled slot")).expect("string key"))
        .collect()
}

// Test: bulk export of keys is complete and stable across calls.
// Verifies: keys {"a","b","c"} come back in the same order twice.
#[test]
fn bulk_export_order_is_stable() {
    let object = abc().bridged();
    let mut first = vec![None; 3];
    object.get_objects_and_keys(None, Some(&mut first[..]), 3);
    let mut second = vec![None; 3];
    object.get_objects_and_keys(None, Some(&mut second[..]), 3);

    let first = strings(&first);
    assert_eq!(first, strings(&second));
    let set: BTreeSet<_> = first.iter().cloned().collect();
    let expected: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(set, expected);
}

// Test: bulk export pairs keys with their values and honors `count`.
#[test]
fn bulk_export_pairs_keys_and_values() {
    let object = abc().bridged();
    let mut keys = vec![None; 2];
    let mut values = vec![None; 2];
    object.get_objects_and_keys(Some(&mut values[..]), Some(&mut keys[..]), 2);
    for (k, v) in keys.iter().zip(&values) {
        let k = String::unbridge(k.as_ref().unwrap()).unwrap();
        let v = i64::unbridge(v.as_ref().unwrap()).unwrap();
        assert_eq!(abc().get(&k), Some(&v));
    }

    let mut untouched = vec![None; 3];
    object.get_objects_and_keys(None, Some(&mut untouched[..]), 0);
    assert!(untouched.iter().all(Option::is_none));
}

// Test: keyed lookup through the foreign protocol.
#[test]
fn lookup_round_trips_values() {
    let native = abc();
    let object = native.clone().bridged();
    for (k, v) in native.iter() {
        let found = object.object_for_key(&k.bridge()).expect("present key");
        assert_eq!(i64::unbridge(&found), Some(*v));
    }
    assert!(object.object_for_key(&"d".to_string().bridge()).is_none());
    assert!(object.object_for_key(&1i64.bridge()).is_none());
}

// Test: value handles are cached, so repeated lookups return one object.
#[test]
fn deferred_values_are_bridged_once() {
    let object = abc().bridged();
    let key = "b".to_string().bridge();
    let first = object.object_for_key(&key).unwrap();
    let second = object.object_for_key(&key).unwrap();
    assert!(first.ptr_eq(&second));
}

// Test: a verbatim view hands back the stored handles themselves.
#[test]
fn verbatim_view_returns_stored_objects() {
    let mut native: NativeDictionary<ForeignHandle, ForeignHandle> = NativeDictionary::new();
    let key = ForeignHandle::new(Boxed("key"));
    let value = ForeignHandle::new(Boxed(17u16));
    native.insert(key.clone(), value.clone());
    let bridged = native.bridge();
    assert!(matches!(bridged, Bridged::Verbatim(_)));
    let object = bridged.into_foreign();
    let found = object.object_for_key(&ForeignHandle::new(Boxed("key"))).unwrap();
    assert!(found.ptr_eq(&value));
}

// Test: block enumeration stops as soon as the block sets the stop flag.
#[test]
fn block_enumeration_honors_stop() {
    let native: NativeDictionary<u32, u32> = (0..50).map(|i| (i, i)).collect();
    let object = native.bridged();
    let mut visited = 0;
    object.enumerate_keys_and_objects(&mut |k, v, stop| {
        assert_eq!(u32::unbridge(k), u32::unbridge(v));
        visited += 1;
        if visited == 7 {
            *stop = true;
        }
    });
    assert_eq!(visited, 7);

    let mut all = 0;
    object.enumerate_keys_and_objects(&mut |_, _, _| all += 1);
    assert_eq!(all, 50);
}

// Test: fast enumeration sets up the cursor and reports exhaustion with 0.
#[test]
fn fast_enumeration_contract() {
    let object = abc().bridged();
    let mut state = FastEnumerationState::new();
    let mut buf: [Option<ForeignHandle>; 2] = Default::default();
    assert_eq!(object.count_by_enumerating(&mut state, &mut buf), 2);
    assert_ne!(state.state, 0);
    let guard = state.mutations;
    assert_ne!(guard, 0);
    assert_eq!(object.count_by_enumerating(&mut state, &mut buf), 1);
    assert_eq!(object.count_by_enumerating(&mut state, &mut buf), 0);
    assert_eq!(object.count_by_enumerating(&mut state, &mut buf), 0);
    assert_eq!(state.mutations, guard);
    assert_eq!(object.count_by_enumerating(&mut state, &mut []), 0);
}

// Test: the view pins its snapshot; later native mutation forks storage.
#[test]
fn mutation_after_bridging_does_not_affect_view() {
    let mut native = abc();
    let object = native.clone().bridged();
    let before = drain_keys(&*object, 2);

    native.insert("z".to_string(), 26);
    native.remove("a");

    assert_eq!(object.count(), 3);
    assert!(object.object_for_key(&"a".to_string().bridge()).is_some());
    assert!(object.object_for_key(&"z".to_string().bridge()).is_none());
    let after = drain_keys(&*object, 3);
    assert_eq!(before, after);
}

// Test: fast enumeration followed by pulling from the same key enumerator.
// Verifies: every key is observed exactly once across the switch-over.
#[test]
fn key_enumerator_switches_between_protocols() {
    let native: NativeDictionary<String, i64> =
        (0..10).map(|i| (format!("k{}", i), i)).collect();
    let object = native.bridged();
    let mut e = object.key_enumerator();
    let mut state = FastEnumerationState::new();
    let mut buf: [Option<ForeignHandle>; 4] = Default::default();

    let mut seen = Vec::new();
    for _ in 0..3 {
        assert_eq!(e.count_by_enumerating(&mut state, &mut buf), 1);
        seen.push(buf[0].take().unwrap());
    }
    while let Some(k) = e.next_object() {
        seen.push(k);
    }
    assert_eq!(e.count_by_enumerating(&mut state, &mut buf), 0);

    let set: BTreeSet<String> = seen.iter().map(|k| String::unbridge(k).unwrap()).collect();
    assert_eq!(seen.len(), 10);
    assert_eq!(set.len(), 10);
}

// Test: adopting a bridged view returns its native storage.
#[test]
fn adopt_returns_pinned_storage() {
    let native = abc();
    let object = native.clone().bridged();
    let adopted: NativeDictionary<String, i64> = adopt_native_storage(&object).unwrap();
    assert!(adopted.shares_storage_with(&native));
    assert_eq!(adopted, native);

    let plain = support::CountingDictionary::with_string_keys(&["a"]);
    let plain: bridged_dict::ForeignDictionaryRef = plain;
    assert!(adopt_native_storage::<String, i64, hashbrown::DefaultHashBuilder>(&plain).is_none());
}

// Test: readers racing to build the key cache observe one published cache.
// Assumes: `bridge_keys` is callable concurrently on one shared view.
// Verifies: all threads get the same Arc, fully populated.
#[test]
fn concurrent_readers_share_one_key_cache() {
    let native: NativeDictionary<u64, String> = (0..500).map(|i| (i, i.to_string())).collect();
    let view = match native.bridge() {
        Bridged::Deferred(view) => view,
        other => panic!("expected a deferred view, got {:?}", other),
    };
    let threads = 8;
    let barrier = Barrier::new(threads);
    let caches: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let (view, barrier) = (&view, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    Arc::clone(view.bridge_keys().expect("keys need bridging"))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("reader thread panicked"))
            .collect()
    });
    for cache in &caches {
        assert!(Arc::ptr_eq(cache, &caches[0]));
        assert_eq!(cache.initialized_count(), 500);
    }
    assert!(Arc::ptr_eq(view.published_keys().unwrap(), &caches[0]));
}
