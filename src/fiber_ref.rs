//! Fiber-Local State
//!
//! A [`FiberRef`] is mutable state scoped to individual fibers rather than
//! OS threads. Each fiber sees its own copy of the value, with defined
//! inheritance semantics across fork and join:
//!
//! - **Fork**: the child starts from a snapshot of the parent's value,
//!   passed through the ref's `fork` function.
//! - **Join**: when a child's refs are inherited (via [`crate::fiber::Fiber::join`]),
//!   the parent's value is merged with the child's through the ref's
//!   `join` function.
//!
//! Both functions are supplied at ref creation time; there is no implicit
//! thread-local magic.
//!
//! # Example
//!
//! ```rust,ignore
//! use ichor::fiber_ref::FiberRef;
//!
//! let program = FiberRef::make(0u32).flat_map(|counter| {
//!     counter.update(|n| n + 1).zip_right(counter.get())
//! });
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::effect::{erase, reify, Effect, EffectRepr, ErrorValue, Val, Value, UIO};

/// Global fiber-ref key counter.
static NEXT_REF_KEY: AtomicU64 = AtomicU64::new(1);

fn next_ref_key() -> u64 {
    NEXT_REF_KEY.fetch_add(1, Ordering::Relaxed)
}

/// Erased ref identity and inheritance functions, shared by every handle
/// to the same ref.
pub(crate) struct FiberRefInner {
    pub(crate) key: u64,
    pub(crate) initial: Val,
    pub(crate) fork: Arc<dyn Fn(&Val) -> Val + Send + Sync>,
    pub(crate) join: Arc<dyn Fn(&Val, &Val) -> Val + Send + Sync>,
}

/// Fiber-local mutable state with explicit fork/join inheritance.
pub struct FiberRef<T> {
    inner: Arc<FiberRefInner>,
    _t: PhantomData<fn() -> T>,
}

impl<T> Clone for FiberRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _t: PhantomData,
        }
    }
}

impl<T> fmt::Debug for FiberRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberRef(#{})", self.inner.key)
    }
}

impl<T: Value> FiberRef<T> {
    /// Allocate a new ref whose children copy the parent's value on fork
    /// and overwrite the parent's value on join.
    pub fn make(initial: T) -> UIO<FiberRef<T>> {
        Self::make_with(initial, |t| t.clone(), |_parent, child| child.clone())
    }

    /// Allocate a new ref with explicit fork and join functions.
    ///
    /// Each evaluation of the returned effect allocates a distinct ref.
    pub fn make_with(
        initial: T,
        fork: impl Fn(&T) -> T + Send + Sync + 'static,
        join: impl Fn(&T, &T) -> T + Send + Sync + 'static,
    ) -> UIO<FiberRef<T>> {
        let fork = Arc::new(fork);
        let join = Arc::new(join);
        Effect::from_repr(Arc::new(EffectRepr::FiberRefNew {
            make: Arc::new(move || {
                let fork = Arc::clone(&fork);
                let join = Arc::clone(&join);
                let inner = Arc::new(FiberRefInner {
                    key: next_ref_key(),
                    initial: erase(initial.clone()),
                    fork: Arc::new(move |v| erase(fork(&reify::<T>(v)))),
                    join: Arc::new(move |parent, child| {
                        erase(join(&reify::<T>(parent), &reify::<T>(child)))
                    }),
                });
                let handle: FiberRef<T> = FiberRef {
                    inner: Arc::clone(&inner),
                    _t: PhantomData,
                };
                (inner, erase(handle))
            }),
        }))
    }

    pub(crate) fn inner(&self) -> Arc<FiberRefInner> {
        Arc::clone(&self.inner)
    }

    /// Atomically read and replace the current fiber's value.
    pub fn modify<B: Value>(&self, f: impl Fn(&T) -> (B, T) + Send + Sync + 'static) -> UIO<B> {
        let inner = Arc::clone(&self.inner);
        Effect::from_repr(Arc::new(EffectRepr::FiberRefModify {
            inner,
            modify: Arc::new(move |val| {
                let current = reify::<T>(val);
                let (out, next) = f(&current);
                (erase(out), erase(next))
            }),
        }))
    }

    /// The current fiber's value.
    pub fn get(&self) -> UIO<T> {
        self.modify(|t| (t.clone(), t.clone()))
    }

    /// Read through a projection without cloning the whole value twice.
    pub fn get_with<B: Value>(&self, f: impl Fn(&T) -> B + Send + Sync + 'static) -> UIO<B> {
        self.modify(move |t| (f(t), t.clone()))
    }

    /// Replace the current fiber's value.
    pub fn set(&self, value: T) -> UIO<()> {
        self.modify(move |_| ((), value.clone()))
    }

    /// Update the current fiber's value.
    pub fn update(&self, f: impl Fn(&T) -> T + Send + Sync + 'static) -> UIO<()> {
        self.modify(move |t| ((), f(t)))
    }

    /// Run `effect` with the ref set to `value`, restoring the previous
    /// value afterwards, whether `effect` succeeds, fails, or is
    /// interrupted.
    pub fn locally<B: Value, E: ErrorValue>(
        &self,
        value: T,
        effect: Effect<B, E>,
    ) -> Effect<B, E> {
        let this = self.clone();
        self.get().widen::<E>().flat_map(move |previous| {
            let this = this.clone();
            let effect = effect.clone();
            let value = value.clone();
            this.set(value)
                .widen::<E>()
                .zip_right(effect.ensuring(this.set(previous.clone())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refs_have_distinct_keys() {
        // keys are allocated at evaluation time, one per FiberRefNew
        assert_ne!(next_ref_key(), next_ref_key());
    }

    #[test]
    fn test_handle_is_cheap_to_clone() {
        let inner = Arc::new(FiberRefInner {
            key: next_ref_key(),
            initial: erase(0u32),
            fork: Arc::new(Val::clone),
            join: Arc::new(|_, child| child.clone()),
        });
        let a: FiberRef<u32> = FiberRef {
            inner,
            _t: PhantomData,
        };
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }
}
