//! Foreign object model: opaque reference-counted handles and the bridging
//! conversions between native values and foreign objects.
//!
//! `ForeignHandle` stands in for a retained reference into the foreign
//! runtime. Cloning retains, dropping releases. Equality and hashing follow
//! the foreign `isEqual`/`hash` contract, while `ptr_eq` is object identity.

use core::any::{self, Any};
use core::fmt;
use core::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;
use std::sync::Arc;
use thiserror::Error;

/// An object living in the foreign runtime.
pub trait ForeignObject: Any + Send + Sync + fmt::Debug {
    /// Foreign value equality (`isEqual:`).
    fn is_equal(&self, other: &dyn ForeignObject) -> bool;

    /// Foreign hash; equal objects must hash equally.
    fn foreign_hash(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}

/// Retained reference to a foreign object.
#[derive(Clone)]
pub struct ForeignHandle(Arc<dyn ForeignObject>);

impl ForeignHandle {
    pub fn new<O: ForeignObject>(object: O) -> Self {
        ForeignHandle(Arc::new(object))
    }

    pub fn object(&self) -> &dyn ForeignObject {
        &*self.0
    }

    /// Object identity, as opposed to `==` which is foreign equality.
    #[inline]
    pub fn ptr_eq(&self, other: &ForeignHandle) -> bool {
        self.identity() == other.identity()
    }

    #[inline]
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Number of outstanding retains on the underlying object.
    pub fn retain_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl PartialEq for ForeignHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0.is_equal(other.object())
    }
}

impl Eq for ForeignHandle {}

impl Hash for ForeignHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.foreign_hash());
    }
}

impl fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Foreign box around a plain native value, the way the foreign runtime wraps
/// strings and numbers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Boxed<T>(pub T);

impl<T> ForeignObject for Boxed<T>
where
    T: Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn is_equal(&self, other: &dyn ForeignObject) -> bool {
        other
            .as_any()
            .downcast_ref::<Boxed<T>>()
            .is_some_and(|o| o.0 == self.0)
    }

    fn foreign_hash(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.0.hash(&mut h);
        h.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Conversion between a native type and foreign objects.
///
/// `VERBATIM` types already are foreign objects: bridging them is a retain
/// and never allocates.
pub trait Bridge: Sized {
    const VERBATIM: bool = false;

    fn bridge(&self) -> ForeignHandle;

    /// Conditional bridge back; `None` when `handle` has no native
    /// counterpart of this type.
    fn unbridge(handle: &ForeignHandle) -> Option<Self>;
}

impl Bridge for ForeignHandle {
    const VERBATIM: bool = true;

    #[inline]
    fn bridge(&self) -> ForeignHandle {
        self.clone()
    }

    #[inline]
    fn unbridge(handle: &ForeignHandle) -> Option<Self> {
        Some(handle.clone())
    }
}

macro_rules! bridge_via_boxed {
    ($($t:ty),* $(,)?) => {
        $(
            impl Bridge for $t {
                fn bridge(&self) -> ForeignHandle {
                    ForeignHandle::new(Boxed(self.clone()))
                }

                fn unbridge(handle: &ForeignHandle) -> Option<Self> {
                    handle.downcast_ref::<Boxed<$t>>().map(|b| b.0.clone())
                }
            }
        )*
    };
}

bridge_via_boxed!(String, bool, char, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

/// Forced bridge back from a foreign object.
pub fn unbridge_or_err<T: Bridge>(handle: &ForeignHandle) -> Result<T, BridgeError> {
    T::unbridge(handle).ok_or_else(|| BridgeError::Unbridgeable {
        target: any::type_name::<T>(),
        handle: format!("{:?}", handle),
    })
}

/// Failure converting a whole foreign dictionary into native form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("foreign object {handle} cannot be bridged to `{target}`")]
    Unbridgeable {
        target: &'static str,
        handle: String,
    },
    #[error("foreign dictionary enumerated key {key} without a value")]
    MissingValue { key: String },
    #[error("distinct foreign keys bridged to the same native key {key}")]
    DuplicateKey { key: String },
}
