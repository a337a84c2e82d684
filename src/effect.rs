//! Effect Descriptions
//!
//! An [`Effect`] is an immutable, lazily evaluated description of a
//! computation: building one never executes side effects, and the same
//! description can be evaluated any number of times. Descriptions form a
//! closed tagged tree that the interpreter in [`crate::context`] drives
//! with an explicit continuation stack.
//!
//! The surface type is phantom-typed over its success and error channels;
//! internally values flow through the interpreter erased as
//! `Arc<dyn Any + Send + Sync>` and are downcast back at the typed
//! boundaries.
//!
//! # Example
//!
//! ```rust,ignore
//! use ichor::effect::Effect;
//!
//! let program = Effect::<i32, String>::succeed(20)
//!     .map(|n| n + 1)
//!     .flat_map(|n| Effect::succeed(n * 2));
//! // nothing has run yet; hand `program` to the runtime to evaluate it
//! ```

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::{Arc, OnceLock};

use crate::cause::{Cause, Defect, ErasedCause, ErasedError};
use crate::context::{AsyncResume, FiberContext};
use crate::env::Env;
use crate::exit::Exit;
use crate::fiber::{Fiber, FiberDescriptor, FiberId};
use crate::fiber_ref::FiberRefInner;
use crate::scope::Scope;
use crate::supervisor::Supervisor;

/// Marker for types that can flow through an effect's success channel.
pub trait Value: Any + Clone + Send + Sync {}
impl<T: Any + Clone + Send + Sync> Value for T {}

/// Marker for types that can flow through an effect's error channel.
/// `Debug` is required so causes stay printable after type erasure.
pub trait ErrorValue: Value + fmt::Debug {}
impl<T: Value + fmt::Debug> ErrorValue for T {}

/// An erased success value.
pub(crate) type Val = Arc<dyn Any + Send + Sync>;

/// Erase a typed value.
pub(crate) fn erase<A: Value>(value: A) -> Val {
    Arc::new(value)
}

/// Recover a typed value. The type is guaranteed by the phantom-typed
/// surface.
pub(crate) fn reify<A: Value>(value: &Val) -> A {
    value
        .downcast_ref::<A>()
        .cloned()
        .expect("success type mismatch")
}

pub(crate) type ThunkFn = Arc<dyn Fn() -> Val + Send + Sync>;
pub(crate) type ContFn = Arc<dyn Fn(Val) -> Arc<EffectRepr> + Send + Sync>;
pub(crate) type FailContFn = Arc<dyn Fn(ErasedCause) -> Arc<EffectRepr> + Send + Sync>;
pub(crate) type RegisterFn = Arc<dyn Fn(AsyncResume) -> Option<Canceler> + Send + Sync>;

/// Cancellation action recorded by an async registration, invoked when the
/// suspended fiber is interrupted.
pub type Canceler = Box<dyn FnOnce() + Send>;

/// The closed variant tree the interpreter dispatches on.
pub(crate) enum EffectRepr {
    /// Pure success.
    Succeed(Val),
    /// Pure failure with a full cause.
    Fail(ErasedCause),
    /// Synchronous thunk; a panic escalates to a defect.
    Total(ThunkFn),
    /// Synchronous thunk; a panic is converted to a typed failure.
    Partial {
        thunk: ThunkFn,
        on_panic: Arc<dyn Fn(Defect) -> ErasedError + Send + Sync>,
    },
    /// Monadic bind.
    FlatMap {
        first: Arc<EffectRepr>,
        then: ContFn,
    },
    /// Full-cause fold: both continuations captured in one frame.
    Fold {
        first: Arc<EffectRepr>,
        on_failure: FailContFn,
        on_success: ContFn,
    },
    /// Guaranteed finalization, run on success, failure, and interruption.
    Ensuring {
        first: Arc<EffectRepr>,
        finalizer: Arc<EffectRepr>,
    },
    /// Callback registration; suspends the fiber until resumed.
    Async { register: RegisterFn },
    /// Fork a child fiber; the parent continues with the child's handle.
    /// `wrap` rebuilds the typed handle from the erased context.
    Fork {
        effect: Arc<EffectRepr>,
        daemon: bool,
        wrap: Arc<dyn Fn(Arc<FiberContext>) -> Val + Send + Sync>,
    },
    /// Environment access.
    Read(Arc<dyn Fn(&Env) -> Arc<EffectRepr> + Send + Sync>),
    /// Environment narrowing for a subtree.
    Provide {
        effect: Arc<EffectRepr>,
        env: Env,
    },
    /// Observe the current interrupt status.
    CheckInterrupt(Arc<dyn Fn(bool) -> Arc<EffectRepr> + Send + Sync>),
    /// Toggle interrupt status for a subtree.
    InterruptStatus {
        effect: Arc<EffectRepr>,
        interruptible: bool,
    },
    /// Attach a supervisor for a subtree.
    Supervise {
        effect: Arc<EffectRepr>,
        supervisor: Supervisor,
    },
    /// Allocate a fresh fiber ref; succeeds with its typed handle.
    FiberRefNew {
        make: Arc<dyn Fn() -> (Arc<FiberRefInner>, Val) + Send + Sync>,
    },
    /// Read-modify-write of a fiber ref in the current fiber.
    FiberRefModify {
        inner: Arc<FiberRefInner>,
        modify: Arc<dyn Fn(&Val) -> (Val, Val) + Send + Sync>,
    },
    /// Merge a completed fiber's refs into the current fiber.
    InheritRefs(Arc<FiberContext>),
    /// Observe the current fiber's descriptor.
    GetDescriptor(Arc<dyn Fn(FiberDescriptor) -> Arc<EffectRepr> + Send + Sync>),
    /// Yield the remainder of this fiber back to the executor.
    Yield,
}

impl EffectRepr {
    /// Inert leaf swapped into child slots while a tree is torn down.
    fn detached() -> Arc<EffectRepr> {
        static DETACHED: OnceLock<Arc<EffectRepr>> = OnceLock::new();
        Arc::clone(DETACHED.get_or_init(|| Arc::new(EffectRepr::Yield)))
    }

    /// Move this node's directly held sub-effects into `out`, leaving
    /// detached leaves behind.
    fn take_children(&mut self, out: &mut Vec<Arc<EffectRepr>>) {
        match self {
            EffectRepr::FlatMap { first, .. } | EffectRepr::Fold { first, .. } => {
                out.push(mem::replace(first, Self::detached()));
            }
            EffectRepr::Ensuring { first, finalizer } => {
                out.push(mem::replace(first, Self::detached()));
                out.push(mem::replace(finalizer, Self::detached()));
            }
            EffectRepr::Fork { effect, .. }
            | EffectRepr::Provide { effect, .. }
            | EffectRepr::InterruptStatus { effect, .. }
            | EffectRepr::Supervise { effect, .. } => {
                out.push(mem::replace(effect, Self::detached()));
            }
            _ => {}
        }
    }
}

// long bind chains form `first` spines whose depth is unbounded; the
// compiler-generated recursive drop glue would consume native stack
// proportional to that depth, so the spine is dismantled with an explicit
// worklist instead
impl Drop for EffectRepr {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_children(&mut pending);
        while let Some(node) = pending.pop() {
            if let Some(mut repr) = Arc::into_inner(node) {
                repr.take_children(&mut pending);
            }
        }
    }
}

/// An immutable description of a computation that may succeed with `A` or
/// fail with a [`Cause`] of `E`.
pub struct Effect<A, E = Infallible> {
    pub(crate) repr: Arc<EffectRepr>,
    _t: PhantomData<fn() -> (A, E)>,
}

/// An effect that cannot fail with a typed error.
pub type UIO<A> = Effect<A, Infallible>;

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self {
            repr: Arc::clone(&self.repr),
            _t: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Effect(..)")
    }
}

impl<A, E> Effect<A, E> {
    pub(crate) fn from_repr(repr: Arc<EffectRepr>) -> Self {
        Self {
            repr,
            _t: PhantomData,
        }
    }
}

impl<A: Value, E: ErrorValue> Effect<A, E> {
    // ========================================================================
    // CONSTRUCTORS
    // ========================================================================

    /// Lift a pure value.
    pub fn succeed(value: A) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Succeed(erase(value))))
    }

    /// Lift a typed failure.
    pub fn fail(error: E) -> Self {
        Self::halt(Cause::fail(error))
    }

    /// Lift a full failure cause.
    pub fn halt(cause: Cause<E>) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Fail(ErasedCause::erase(cause))))
    }

    /// Lift a defect.
    pub fn die<T: Any + Send + Sync + fmt::Debug>(payload: T) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Fail(Cause::Die(Defect::new(payload)))))
    }

    /// A synchronous side effect that cannot fail. A panic inside the
    /// thunk escalates to a defect, never a typed failure.
    pub fn total(thunk: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Total(Arc::new(move || {
            erase(thunk())
        }))))
    }

    /// A synchronous side effect whose panics are converted to typed
    /// failures through `on_panic`.
    pub fn partial(
        thunk: impl Fn() -> A + Send + Sync + 'static,
        on_panic: impl Fn(Defect) -> E + Send + Sync + 'static,
    ) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Partial {
            thunk: Arc::new(move || erase(thunk())),
            on_panic: Arc::new(move |defect| ErasedError::new(on_panic(defect))),
        }))
    }

    /// Defer construction of an effect until evaluation.
    pub fn suspend(make: impl Fn() -> Effect<A, E> + Send + Sync + 'static) -> Self {
        Self::from_repr(Arc::new(EffectRepr::FlatMap {
            first: Arc::new(EffectRepr::Succeed(erase(()))),
            then: Arc::new(move |_| make().repr),
        }))
    }

    /// Lift a plain `Result`.
    pub fn from_result(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Self::succeed(a),
            Err(e) => Self::fail(e),
        }
    }

    /// Lift a precomputed exit.
    pub fn done(exit: Exit<A, E>) -> Self {
        match exit {
            Exit::Success(a) => Self::succeed(a),
            Exit::Failure(c) => Self::halt(c),
        }
    }

    /// An effect that never completes. Interruptible while suspended.
    pub fn never() -> Self {
        Self::from_repr(Arc::new(EffectRepr::Async {
            register: Arc::new(|_resume| None),
        }))
    }

    /// Register a callback-based asynchronous computation.
    ///
    /// The registration closure receives a resume handle; invoking it more
    /// than once is a no-op. Returning a [`Canceler`] records a
    /// cancellation action to run if the suspended fiber is interrupted.
    pub fn async_effect(
        register: impl Fn(AsyncCallback<A, E>) -> Option<Canceler> + Send + Sync + 'static,
    ) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Async {
            register: Arc::new(move |resume| {
                register(AsyncCallback {
                    resume,
                    _t: PhantomData,
                })
            }),
        }))
    }

    /// Access the environment with a pure function.
    pub fn access(f: impl Fn(&Env) -> A + Send + Sync + 'static) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Read(Arc::new(move |env| {
            Arc::new(EffectRepr::Succeed(erase(f(env))))
        }))))
    }

    /// Access the environment with an effectful function.
    pub fn access_effect(f: impl Fn(&Env) -> Effect<A, E> + Send + Sync + 'static) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Read(Arc::new(move |env| f(env).repr))))
    }

    /// Observe the current fiber's descriptor and continue with an effect
    /// built from it.
    pub fn descriptor_with(
        f: impl Fn(FiberDescriptor) -> Effect<A, E> + Send + Sync + 'static,
    ) -> Self {
        Self::from_repr(Arc::new(EffectRepr::GetDescriptor(Arc::new(move |d| {
            f(d).repr
        }))))
    }

    /// Observe the current interrupt status and continue with an effect
    /// built from it.
    pub fn check_interrupt(f: impl Fn(bool) -> Effect<A, E> + Send + Sync + 'static) -> Self {
        Self::from_repr(Arc::new(EffectRepr::CheckInterrupt(Arc::new(move |status| {
            f(status).repr
        }))))
    }

    // ========================================================================
    // COMBINATORS
    // ========================================================================

    /// Sequence another effect after this one.
    pub fn flat_map<B: Value>(
        self,
        f: impl Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    ) -> Effect<B, E> {
        Effect::from_repr(Arc::new(EffectRepr::FlatMap {
            first: self.repr,
            then: Arc::new(move |val| f(reify::<A>(&val)).repr),
        }))
    }

    /// Transform the success value.
    pub fn map<B: Value>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Effect<B, E> {
        self.flat_map(move |a| Effect::succeed(f(a)))
    }

    /// Replace the success value, discarding the current one.
    pub fn as_value<B: Value>(self, value: B) -> Effect<B, E> {
        self.map(move |_| value.clone())
    }

    /// Sequence, keeping only the second result.
    pub fn zip_right<B: Value>(self, that: Effect<B, E>) -> Effect<B, E> {
        self.flat_map(move |_| that.clone())
    }

    /// Sequence, pairing both results.
    pub fn zip<B: Value>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        self.flat_map(move |a| that.clone().map(move |b| (a.clone(), b)))
    }

    /// Sequence two effects, combining their results with `f`.
    pub fn zip_with<B: Value, C: Value>(
        self,
        that: Effect<B, E>,
        f: impl Fn(A, B) -> C + Send + Sync + 'static,
    ) -> Effect<C, E> {
        let f = Arc::new(f);
        self.flat_map(move |a| {
            let f = Arc::clone(&f);
            that.clone().map(move |b| f(a.clone(), b))
        })
    }

    /// Full-cause fold: handle failure and success with one frame.
    ///
    /// The failure continuation sees the complete [`Cause`], including
    /// defects and interruptions; it is the only way to observe those.
    pub fn fold_cause<B: Value, E2: ErrorValue>(
        self,
        failure: impl Fn(Cause<E>) -> Effect<B, E2> + Send + Sync + 'static,
        success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        Effect::from_repr(Arc::new(EffectRepr::Fold {
            first: self.repr,
            on_failure: Arc::new(move |cause| failure(cause.reify::<E>()).repr),
            on_success: Arc::new(move |val| success(reify::<A>(&val)).repr),
        }))
    }

    /// Fold over the typed error channel. Defects and interruptions are
    /// not intercepted and continue to propagate.
    pub fn fold<B: Value, E2: ErrorValue>(
        self,
        failure: impl Fn(E) -> Effect<B, E2> + Send + Sync + 'static,
        success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        self.fold_cause(
            move |cause| match cause.into_fail_free::<E2>() {
                Ok(fail_free) => Effect::halt(fail_free),
                Err(original) => match original.failures().first() {
                    Some(e) => failure((*e).clone()),
                    None => Effect::die("fold: cause claimed failures but had none"),
                },
            },
            success,
        )
    }

    /// Recover from typed failures.
    pub fn catch_all<E2: ErrorValue>(
        self,
        f: impl Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        self.fold(f, Effect::succeed)
    }

    /// Transform the typed error.
    pub fn map_error<E2: ErrorValue>(
        self,
        f: impl Fn(E) -> E2 + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        self.catch_all(move |e| Effect::fail(f(e)))
    }

    /// Reflect the full cause into the error channel.
    pub fn sandbox(self) -> Effect<A, Cause<E>> {
        self.fold_cause(Effect::fail, Effect::succeed)
    }

    /// Reflect completion into the success channel as an [`Exit`].
    pub fn exit(self) -> UIO<Exit<A, E>> {
        self.fold_cause(
            |cause| Effect::succeed(Exit::Failure(cause)),
            |a| Effect::succeed(Exit::Success(a)),
        )
    }

    /// Reflect the typed error channel into a `Result`.
    pub fn either(self) -> UIO<Result<A, E>> {
        self.fold(
            |e| Effect::succeed(Err(e)),
            |a| Effect::succeed(Ok(a)),
        )
    }

    /// Run `finalizer` after this effect, whether it succeeds, fails, or
    /// is interrupted. The finalizer is uninterruptible.
    pub fn ensuring(self, finalizer: UIO<()>) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Ensuring {
            first: self.repr,
            finalizer: finalizer.repr,
        }))
    }

    /// Fork this effect as a child fiber of the current one.
    ///
    /// Non-blocking: the child is scheduled, not necessarily started,
    /// before the parent continues with the child's handle.
    pub fn fork(self) -> Effect<Fiber<A, E>, E> {
        Effect::from_repr(Arc::new(EffectRepr::Fork {
            effect: self.repr,
            daemon: false,
            wrap: Arc::new(|ctx| erase(Fiber::<A, E>::from_context(ctx))),
        }))
    }

    /// Fork without tying the child's lifetime to the current fiber.
    pub fn fork_daemon(self) -> Effect<Fiber<A, E>, E> {
        Effect::from_repr(Arc::new(EffectRepr::Fork {
            effect: self.repr,
            daemon: true,
            wrap: Arc::new(|ctx| erase(Fiber::<A, E>::from_context(ctx))),
        }))
    }

    /// Fork as a daemon whose lifetime is bounded by `scope`: closing the
    /// scope requests interruption of the fiber.
    pub fn fork_in<S: Value>(self, scope: &Scope<S>) -> Effect<Fiber<A, E>, E> {
        let scope = scope.clone();
        self.fork_daemon().flat_map(move |fiber| {
            let scope = scope.clone();
            Effect::total(move || {
                let handle = fiber.clone();
                scope.add_finalizer(move |_| handle.kick_interrupt());
                fiber.clone()
            })
        })
    }

    /// Mark this effect interruptible.
    pub fn interruptible(self) -> Self {
        Self::from_repr(Arc::new(EffectRepr::InterruptStatus {
            effect: self.repr,
            interruptible: true,
        }))
    }

    /// Mark this effect uninterruptible. Interruption requested while it
    /// runs is deferred to the next interruptible point.
    pub fn uninterruptible(self) -> Self {
        Self::from_repr(Arc::new(EffectRepr::InterruptStatus {
            effect: self.repr,
            interruptible: false,
        }))
    }

    /// Provide a complete environment to this effect.
    pub fn provide(self, env: Env) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Provide {
            effect: self.repr,
            env,
        }))
    }

    /// Transform the current environment for this effect.
    pub fn provide_with(self, f: impl Fn(&Env) -> Env + Send + Sync + 'static) -> Self {
        let repr = self.repr;
        Self::from_repr(Arc::new(EffectRepr::Read(Arc::new(move |env| {
            Arc::new(EffectRepr::Provide {
                effect: Arc::clone(&repr),
                env: f(env),
            })
        }))))
    }

    /// Attach a supervisor to this effect's subtree: fibers forked within
    /// it report start and end to `supervisor`.
    pub fn supervised(self, supervisor: Supervisor) -> Self {
        Self::from_repr(Arc::new(EffectRepr::Supervise {
            effect: self.repr,
            supervisor,
        }))
    }
}

impl<A: Value> UIO<A> {
    /// Widen the error channel of an infallible effect.
    pub fn widen<E2: ErrorValue>(self) -> Effect<A, E2> {
        // sound: no Fail node can carry an Infallible value
        Effect::from_repr(self.repr)
    }
}

impl Effect<(), Infallible> {
    /// The unit effect.
    pub fn unit() -> UIO<()> {
        Effect::succeed(())
    }

    /// Yield the current fiber back to the executor, letting other fibers
    /// run before it continues.
    pub fn yield_now() -> UIO<()> {
        Effect::from_repr(Arc::new(EffectRepr::Yield))
    }
}

impl Effect<FiberDescriptor, Infallible> {
    /// The current fiber's descriptor.
    pub fn descriptor() -> UIO<FiberDescriptor> {
        Effect::descriptor_with(Effect::succeed)
    }
}

/// Typed service lookup; an absent service is a programmer error and
/// surfaces as a defect.
pub fn service<S: Any + Send + Sync>() -> UIO<Arc<S>> {
    Effect::access_effect(|env| match env.get::<S>() {
        Some(s) => Effect::succeed(s),
        None => Effect::die(format!(
            "missing service: {}",
            std::any::type_name::<S>()
        )),
    })
}

/// Typed resume handle passed to [`Effect::async_effect`] registrations.
///
/// Cloneable so it can be moved into callbacks; every invocation after the
/// first is a no-op.
pub struct AsyncCallback<A, E> {
    resume: AsyncResume,
    _t: PhantomData<fn(A, E)>,
}

impl<A, E> Clone for AsyncCallback<A, E> {
    fn clone(&self) -> Self {
        Self {
            resume: self.resume.clone(),
            _t: PhantomData,
        }
    }
}

impl<A: Value, E: ErrorValue> AsyncCallback<A, E> {
    /// Resume the suspended fiber with a success.
    pub fn succeed(&self, value: A) {
        self.resume.resume(Exit::Success(erase(value)));
    }

    /// Resume the suspended fiber with a typed failure.
    pub fn fail(&self, error: E) {
        self.halt(Cause::fail(error));
    }

    /// Resume the suspended fiber with a full cause.
    pub fn halt(&self, cause: Cause<E>) {
        self.resume.resume(Exit::Failure(ErasedCause::erase(cause)));
    }

    /// Resume the suspended fiber with a precomputed exit.
    pub fn done(&self, exit: Exit<A, E>) {
        match exit {
            Exit::Success(a) => self.succeed(a),
            Exit::Failure(c) => self.halt(c),
        }
    }
}

/// Attribute an interruption to `by` and halt with it.
pub fn interrupt_as<A: Value, E: ErrorValue>(by: FiberId) -> Effect<A, E> {
    Effect::halt(Cause::interrupt(by))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_building_effects_runs_nothing() {
        use std::sync::atomic::{AtomicBool, Ordering};
        static RAN: AtomicBool = AtomicBool::new(false);

        let _effect = Effect::<i32, String>::total(|| {
            RAN.store(true, Ordering::SeqCst);
            1
        })
        .map(|n| n + 1)
        .flat_map(|n| Effect::succeed(n * 2));

        assert!(!RAN.load(Ordering::SeqCst));
    }

    #[test]
    fn test_effects_are_cheaply_cloneable() {
        let effect = Effect::<i32, String>::succeed(1).map(|n| n + 1);
        let clone = effect.clone();
        assert!(Arc::ptr_eq(&effect.repr, &clone.repr));
    }

    #[test]
    fn test_dropping_a_deep_chain_does_not_overflow() {
        let mut effect = Effect::<u32, String>::succeed(0);
        for _ in 0..100_000 {
            effect = effect.map(|n| n + 1);
        }
        drop(effect);
    }

    #[test]
    fn test_erase_reify_roundtrip() {
        let val = erase(vec![1, 2, 3]);
        let back: Vec<i32> = reify(&val);
        assert_eq!(back, vec![1, 2, 3]);
    }
}
