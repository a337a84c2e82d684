//! Fiber Identity and Handles
//!
//! A fiber is a lightweight, cooperatively scheduled unit of execution with
//! its own interruption and completion lifecycle. This module provides the
//! fiber's identity, its externally observable status, and the typed
//! [`Fiber`] handle obtained from a fork.
//!
//! The handle is purely descriptive: all of its operations (`wait`, `join`,
//! `interrupt`, `poll`) are themselves effects and run nothing until
//! evaluated.

use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::context::FiberContext;
use crate::effect::{erase, reify, Effect, EffectRepr, Value, ErrorValue, UIO};
use crate::exit::Exit;
use crate::fiber_ref::FiberRef;

/// Unique identifier for a fiber: an allocation sequence number plus the
/// start timestamp. Used to attribute interruption causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId {
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// Milliseconds since the Unix epoch when the fiber was created.
    pub started_at: u64,
}

/// Global fiber ID counter.
static NEXT_FIBER_SEQ: AtomicU64 = AtomicU64::new(1);

impl FiberId {
    /// Allocate a fresh fiber id.
    pub fn new() -> Self {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            seq: NEXT_FIBER_SEQ.fetch_add(1, Ordering::Relaxed),
            started_at,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(seq: u64) -> Self {
        Self { seq, started_at: 0 }
    }
}

impl Default for FiberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber #{}", self.seq)
    }
}

/// Externally observable fiber lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Interpreting effect nodes, or queued for a turn.
    Running,
    /// Suspended on an async registration.
    Suspended,
    /// Interruption delivered; unwinding toward completion.
    Interrupting,
    /// Resolved to an exit.
    Done,
}

/// A snapshot of the executing fiber, observable from within an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiberDescriptor {
    /// The executing fiber's id.
    pub id: FiberId,
    /// Whether the fiber is currently interruptible.
    pub interruptible: bool,
}

/// Typed public handle to a forked fiber.
///
/// Becomes "done" exactly once; all pending and future `wait` effects then
/// resolve immediately with the stored [`Exit`].
pub struct Fiber<A, E = Infallible> {
    pub(crate) context: Arc<FiberContext>,
    _t: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            _t: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Fiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({})", self.id())
    }
}

impl<A, E> Fiber<A, E> {
    pub(crate) fn from_context(context: Arc<FiberContext>) -> Self {
        Self {
            context,
            _t: PhantomData,
        }
    }

    /// This fiber's id.
    pub fn id(&self) -> FiberId {
        self.context.id()
    }

    /// Snapshot of the fiber's lifecycle state.
    pub fn status(&self) -> FiberStatus {
        self.context.status()
    }

    /// Request interruption without waiting for acknowledgement.
    pub(crate) fn kick_interrupt(&self) {
        self.context.signal_interrupt(self.context.id());
    }
}

impl<A: Value, E: ErrorValue> Fiber<A, E> {
    /// Suspend until the fiber is done, producing its exit.
    pub fn wait(&self) -> UIO<Exit<A, E>> {
        let ctx = Arc::clone(&self.context);
        Effect::from_repr(Arc::new(EffectRepr::Async {
            register: Arc::new(move |resume| {
                let resume = resume.clone();
                ctx.on_done(Box::new(move |exit| {
                    let typed: Exit<A, E> = exit.clone().reify::<A, E>();
                    resume.resume(Exit::Success(erase(typed)));
                }));
                None
            }),
        }))
    }

    /// Suspend until done, then propagate the fiber's result into the
    /// current fiber, inheriting its fiber-ref values.
    pub fn join(&self) -> Effect<A, E> {
        let this = self.clone();
        self.wait().widen::<E>().flat_map(move |exit| {
            let exit = exit.clone();
            this.inherit_refs()
                .widen::<E>()
                .flat_map(move |_| Effect::done(exit.clone()))
        })
    }

    /// Request interruption, attributed to the fiber's own id, and suspend
    /// until it acknowledges with an exit.
    ///
    /// Interruption is cooperative: a fiber stuck in a synchronous loop
    /// that never reaches an interruptible point cannot be interrupted.
    pub fn interrupt(&self) -> UIO<Exit<A, E>> {
        self.interrupt_as(self.context.id())
    }

    /// Request interruption attributed to `by` and suspend until the
    /// fiber acknowledges with an exit. The request is durable: it is
    /// honored at the next interruptible point, whenever that is reached.
    pub fn interrupt_as(&self, by: FiberId) -> UIO<Exit<A, E>> {
        let ctx = Arc::clone(&self.context);
        let this = self.clone();
        Effect::total(move || ctx.signal_interrupt(by)).flat_map(move |_| this.wait())
    }

    /// Observe the exit if the fiber is already done.
    pub fn poll(&self) -> UIO<Option<Exit<A, E>>> {
        let ctx = Arc::clone(&self.context);
        Effect::total(move || ctx.poll().map(|exit| exit.reify::<A, E>()))
    }

    /// Merge this fiber's fiber-ref values into the current fiber using
    /// each ref's join function.
    pub fn inherit_refs(&self) -> UIO<()> {
        Effect::from_repr(Arc::new(EffectRepr::InheritRefs(Arc::clone(
            &self.context,
        ))))
    }

    /// Read this fiber's current value of a fiber ref.
    pub fn get_ref<T: Value>(&self, fiber_ref: &FiberRef<T>) -> UIO<T> {
        let ctx = Arc::clone(&self.context);
        let inner = fiber_ref.inner();
        Effect::total(move || reify::<T>(&ctx.ref_value(&inner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiber_ids_are_unique_and_increasing() {
        let a = FiberId::new();
        let b = FiberId::new();
        assert_ne!(a, b);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_fiber_id_display() {
        let id = FiberId::for_test(42);
        assert_eq!(id.to_string(), "fiber #42");
    }
}
