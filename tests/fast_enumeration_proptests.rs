// Bridged dictionary property tests.
//
// Property 1: batch-size invariance of fast enumeration.
//  - Draining a bridged view with any buffer size yields every key exactly
//    once, in the same order, and the total equals count().
//
// Property 2: bridged lookup round-trip.
//  - For every key k of a native dictionary D, looking up the bridged k
//    through the bridged view and unbridging yields D[k]; keys never
//    inserted read as absent.
//
// Property 3: foreign-supplied dictionaries iterate to the same entries
// they were built from, whatever their size relative to the iterator's
// batch buffer.
mod support;

use bridged_dict::{Bridge, CocoaDictionary, NativeDictionary, PlainDictionary};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};
use support::drain_keys;

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_fast_enumeration_is_batch_size_invariant(
        keys in proptest::collection::hash_set("[a-z]{1,6}", 0..120),
        batches in proptest::collection::vec(1usize..40, 1..4),
    ) {
        let native: NativeDictionary<String, usize> =
            keys.iter().cloned().map(|k| { let n = k.len(); (k, n) }).collect();
        let object = native.bridged();
        let reference = drain_keys(&*object, 1);
        prop_assert_eq!(reference.len(), keys.len());
        prop_assert_eq!(object.count(), keys.len());

        let seen: std::collections::HashSet<String> =
            reference.iter().map(|k| String::unbridge(k).unwrap()).collect();
        prop_assert_eq!(&seen, &keys);

        for batch in batches {
            let drained = drain_keys(&*object, batch);
            prop_assert_eq!(&drained, &reference);
        }
    }

    #[test]
    fn prop_bridged_lookup_round_trips(
        entries in proptest::collection::hash_map(any::<u32>(), any::<i64>(), 0..100),
        probes in proptest::collection::vec(any::<u32>(), 0..20),
    ) {
        let native: NativeDictionary<u32, i64> = entries.iter().map(|(k, v)| (*k, *v)).collect();
        let object = native.clone().bridged();
        for (k, v) in &entries {
            let found = object.object_for_key(&k.bridge());
            prop_assert_eq!(found.and_then(|h| i64::unbridge(&h)), Some(*v));
        }
        for p in probes {
            let expected = entries.get(&p).copied();
            prop_assert_eq!(object.object_for_key(&p.bridge()).and_then(|h| i64::unbridge(&h)), expected);
        }
    }

    #[test]
    fn prop_cocoa_iteration_matches_source(
        entries in proptest::collection::btree_map(any::<u16>(), any::<u16>(), 0..80),
    ) {
        let plain = PlainDictionary::from_pairs(entries.iter().map(|(k, v)| (k.bridge(), v.bridge())));
        let d = CocoaDictionary::new(plain.into_ref());
        let mut seen = BTreeMap::new();
        for (k, v) in &d {
            prop_assert!(seen.insert(u16::unbridge(&k).unwrap(), u16::unbridge(&v).unwrap()).is_none());
        }
        prop_assert_eq!(seen, entries);

        let native: NativeDictionary<u16, u16> = d.map_values(|v: u16| v);
        let back: HashMap<u16, u16> = native.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(back.len(), d.count());
    }
}
