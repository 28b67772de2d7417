// Shared fixtures for integration tests.
#![allow(dead_code)]

use bridged_dict::{
    Bridge, FastEnumerationState, ForeignDictionary, ForeignDictionaryRef, ForeignEnumerator,
    ForeignHandle, PlainDictionary,
};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Foreign dictionary that counts keyed lookups and bulk exports, so tests
/// can observe which foreign primitives an adapter used.
#[derive(Debug)]
pub struct CountingDictionary {
    inner: PlainDictionary,
    lookups: AtomicUsize,
    exports: AtomicUsize,
}

impl CountingDictionary {
    pub fn new(inner: PlainDictionary) -> Arc<Self> {
        Arc::new(Self {
            inner,
            lookups: AtomicUsize::new(0),
            exports: AtomicUsize::new(0),
        })
    }

    pub fn with_string_keys(keys: &[&str]) -> Arc<Self> {
        Self::new(PlainDictionary::from_pairs(
            keys.iter()
                .enumerate()
                .map(|(i, k)| (k.to_string().bridge(), (i as i64).bridge())),
        ))
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn exports(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }
}

impl ForeignDictionary for CountingDictionary {
    fn count(&self) -> usize {
        self.inner.count()
    }

    fn object_for_key(&self, key: &ForeignHandle) -> Option<ForeignHandle> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.object_for_key(key)
    }

    fn get_objects_and_keys(
        &self,
        objects: Option<&mut [Option<ForeignHandle>]>,
        keys: Option<&mut [Option<ForeignHandle>]>,
        count: usize,
    ) {
        self.exports.fetch_add(1, Ordering::SeqCst);
        self.inner.get_objects_and_keys(objects, keys, count)
    }

    fn enumerate_keys_and_objects(
        &self,
        block: &mut dyn FnMut(&ForeignHandle, &ForeignHandle, &mut bool),
    ) {
        self.inner.enumerate_keys_and_objects(block)
    }

    fn count_by_enumerating(
        &self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        self.inner.count_by_enumerating(state, objects)
    }

    fn key_enumerator(&self) -> Box<dyn ForeignEnumerator> {
        self.inner.key_enumerator()
    }

    fn copy(self: Arc<Self>) -> ForeignDictionaryRef {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Foreign dictionary whose fast enumeration reports a new mutation guard on
/// every call, as a dictionary mutated mid-enumeration would.
#[derive(Debug)]
pub struct MutatingDictionary {
    inner: PlainDictionary,
    generation: AtomicUsize,
}

impl MutatingDictionary {
    pub fn with_u32_keys(n: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: PlainDictionary::from_pairs((0..n).map(|i| (i.bridge(), i.bridge()))),
            generation: AtomicUsize::new(1),
        })
    }
}

impl ForeignDictionary for MutatingDictionary {
    fn count(&self) -> usize {
        self.inner.count()
    }

    fn object_for_key(&self, key: &ForeignHandle) -> Option<ForeignHandle> {
        self.inner.object_for_key(key)
    }

    fn get_objects_and_keys(
        &self,
        objects: Option<&mut [Option<ForeignHandle>]>,
        keys: Option<&mut [Option<ForeignHandle>]>,
        count: usize,
    ) {
        self.inner.get_objects_and_keys(objects, keys, count)
    }

    fn enumerate_keys_and_objects(
        &self,
        block: &mut dyn FnMut(&ForeignHandle, &ForeignHandle, &mut bool),
    ) {
        self.inner.enumerate_keys_and_objects(block)
    }

    fn count_by_enumerating(
        &self,
        state: &mut FastEnumerationState,
        objects: &mut [Option<ForeignHandle>],
    ) -> usize {
        let n = self.inner.count_by_enumerating(state, objects);
        state.mutations = self.generation.fetch_add(1, Ordering::SeqCst);
        n
    }

    fn key_enumerator(&self) -> Box<dyn ForeignEnumerator> {
        self.inner.key_enumerator()
    }

    fn copy(self: Arc<Self>) -> ForeignDictionaryRef {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Drain `object` by fast enumeration with buffers of `batch` slots.
pub fn drain_keys(object: &dyn ForeignDictionary, batch: usize) -> Vec<ForeignHandle> {
    let mut state = FastEnumerationState::new();
    let mut buf: Vec<Option<ForeignHandle>> = vec![None; batch];
    let mut out = Vec::new();
    loop {
        let n = object.count_by_enumerating(&mut state, &mut buf);
        if n == 0 {
            return out;
        }
        assert!(n <= batch);
        out.extend(buf[..n].iter_mut().map(|slot| slot.take().expect("filled slot")));
    }
}
