#![cfg(test)]

// Property tests for NativeDictionary kept inside the crate so they can
// reach bucket-level internals without feature gates.

use crate::native_dictionary::{InsertError, NativeDictionary};
use core::hash::BuildHasher;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hasher;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertNew(usize, i32),
    Remove(usize),
    Find(usize),
    Contains(String),
    Mutate(usize, i32),
    Iterate,
    Snapshot,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=24).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            3 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertNew(i, v)),
            2 => idx.clone().prop_map(OpI::Remove),
            1 => idx.clone().prop_map(OpI::Find),
            1 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Iterate),
            1 => Just(OpI::Snapshot),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - `insert` upserts and reports the previous value; `insert_new` rejects duplicates.
// - `find`/`contains_key` parity with the model, including borrowed `&str` lookups.
// - `remove` returns the owned `(K,V)` matching the model.
// - `len()` equals both the model size and the number of occupied buckets.
// - Snapshots taken with `clone()` are unaffected by later mutations.
// - The age changes on every structural mutation and only then.
fn run_state_machine<S>(
    mut sut: NativeDictionary<Key, i32, S>,
    pool: Vec<String>,
    ops: Vec<OpI>,
) -> Result<(), TestCaseError>
where
    S: BuildHasher + Clone,
{
    let mut model: HashMap<Key, i32> = HashMap::new();
    let mut snapshots: Vec<(NativeDictionary<Key, i32, S>, HashMap<Key, i32>)> = Vec::new();

    for op in ops {
        let age_before = sut.age();
        let mut structural = false;
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(&pool, i);
                let prev = sut.insert(k.clone(), v);
                let model_prev = model.insert(k, v);
                structural = model_prev.is_none();
                prop_assert_eq!(prev, model_prev);
            }
            OpI::InsertNew(i, v) => {
                let k = key_from(&pool, i);
                let already = model.contains_key(&k);
                match sut.insert_new(k.clone(), v) {
                    Ok(bucket) => {
                        prop_assert!(!already, "insert_new must fail on duplicate");
                        prop_assert!(sut.hash_table().is_occupied(bucket));
                        model.insert(k, v);
                        structural = true;
                    }
                    Err(InsertError::DuplicateKey) => {
                        prop_assert!(already, "duplicate error only when key exists");
                    }
                }
            }
            OpI::Remove(i) => {
                let k = key_from(&pool, i);
                let removed = sut.remove(&k);
                let model_removed = model.remove(&k);
                structural = model_removed.is_some();
                prop_assert_eq!(removed.map(|(_, v)| v), model_removed);
            }
            OpI::Find(i) => {
                let k = key_from(&pool, i);
                let found = sut.find(&k);
                prop_assert_eq!(found.is_some(), model.contains_key(&k));
                if let Some(bucket) = found {
                    prop_assert!(sut.hash_table().is_occupied(bucket));
                    prop_assert_eq!(sut.get(&k), model.get(&k));
                }
            }
            OpI::Contains(s) => {
                let has = sut.contains_key(s.as_str());
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(has, has_model);
            }
            OpI::Mutate(i, d) => {
                let k = key_from(&pool, i);
                match (sut.get_mut(&k), model.get_mut(&k)) {
                    (Some(v), Some(mv)) => {
                        *v = v.saturating_add(d);
                        *mv = mv.saturating_add(d);
                    }
                    (None, None) => {}
                    _ => prop_assert!(false, "get_mut presence diverged from model"),
                }
            }
            OpI::Iterate => {
                let s_keys: BTreeSet<_> = sut.keys().cloned().collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
            }
            OpI::Snapshot => snapshots.push((sut.clone(), model.clone())),
        }

        // Post-conditions after each op
        if structural {
            prop_assert_ne!(sut.age(), age_before);
        } else {
            prop_assert_eq!(sut.age(), age_before);
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.len(), sut.hash_table().occupied_count());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }

    for (snap, expected) in &snapshots {
        prop_assert_eq!(snap.len(), expected.len());
        for (k, v) in expected {
            prop_assert_eq!(snap.get(k), Some(v));
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_state_machine(NativeDictionary::new(), pool, ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution
// and backward-shift deletion within a single probe run.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Low-entropy hasher: few distinct hashes, so runs from different ideal
// buckets interleave and wrap around the table end.
#[derive(Clone, Default)]
struct FewBucketsBuildHasher;
struct FewBucketsHasher(u64);
impl BuildHasher for FewBucketsBuildHasher {
    type Hasher = FewBucketsHasher;
    fn build_hasher(&self) -> Self::Hasher {
        FewBucketsHasher(0)
    }
}
impl Hasher for FewBucketsHasher {
    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = self.0.wrapping_add(*b as u64);
        }
    }
    fn finish(&self) -> u64 {
        // Push every key towards the top of the table to exercise wrapping.
        (self.0 % 3).wrapping_sub(1)
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_state_machine(NativeDictionary::with_hasher(ConstBuildHasher), pool, ops)?;
    }

    #[test]
    fn prop_state_machine_with_wrapping_runs((pool, ops) in arb_scenario()) {
        run_state_machine(NativeDictionary::with_hasher(FewBucketsBuildHasher), pool, ops)?;
    }
}
