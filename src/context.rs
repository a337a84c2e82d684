//! Fiber Interpreter
//!
//! A [`FiberContext`] is the execution state of one fiber: an explicit
//! continuation stack over the effect tree, plus the shared lifecycle cell
//! other fibers observe and interrupt through.
//!
//! Evaluation proceeds in *turns*. A turn holds the interpreter state lock
//! and dispatches effect nodes until the fiber completes, suspends on an
//! async registration, yields, or exhausts its per-turn op budget; in the
//! latter two cases the remainder is resubmitted to the executor so other
//! fibers can run. At most one turn of a fiber is in flight at any time.
//!
//! ## Interruption
//!
//! Interruption requests are durable: they accumulate in the lifecycle
//! cell and are delivered the next time the fiber is at an interruptible
//! point. Delivery turns the remaining computation into a failure with the
//! accumulated interrupt cause, which then unwinds the continuation stack.
//! While unwinding an interrupting fiber, failure handlers in
//! interruptible code are skipped; finalizers, and handlers inside
//! uninterruptible regions, still run. A handler that does consume the
//! cause ends the unwind, and because the request is durable it is
//! delivered again at the next interruptible point.
//!
//! ## Structured completion
//!
//! A completing fiber first interrupts its live non-daemon children and
//! waits for all of their exits, then closes its own scope, and only then
//! publishes its exit to observers.

use std::collections::HashMap;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cause::{Cause, Defect, ErasedCause};
use crate::config;
use crate::effect::{erase, Canceler, EffectRepr, Val};
use crate::env::Env;
use crate::executor::Executor;
use crate::exit::{ErasedExit, Exit};
use crate::fiber::{FiberDescriptor, FiberId, FiberStatus};
use crate::fiber_ref::FiberRefInner;
use crate::scope::Scope;
use crate::supervisor::Supervisor;

/// Completion callback, invoked exactly once with the fiber's exit.
pub(crate) type Observer = Box<dyn FnOnce(&ErasedExit) + Send>;

/// Sink for failures of fibers that completed with no observer attached.
pub(crate) type FailureReporter = Arc<dyn Fn(FiberId, &ErasedCause) + Send + Sync>;

/// One saved continuation on the interpreter stack.
enum Frame {
    /// Success continuation of a bind.
    FlatMap(crate::effect::ContFn),
    /// Both continuations of a full-cause fold.
    Fold {
        on_failure: crate::effect::FailContFn,
        on_success: crate::effect::ContFn,
    },
    /// Finalizer to run on any completion path.
    Finalizer(Arc<EffectRepr>),
    /// Restore the previous environment on the way out.
    PopEnv,
    /// Restore the previous interrupt status on the way out.
    PopInterruptStatus,
    /// Restore the previous supervisor on the way out.
    PopSupervisor,
}

/// A fiber's view of one fiber ref.
struct RefEntry {
    value: Val,
    inner: Arc<FiberRefInner>,
}

/// Interpreter state, owned by the currently running turn.
struct Core {
    /// Environment scope stack; the last entry is current. Never empty.
    env_stack: Vec<Env>,
    /// Interrupt status scope stack; the last entry is current. Never empty.
    status_stack: Vec<bool>,
    /// Supervisor scope stack; the last entry is current. Never empty.
    supervisor_stack: Vec<Supervisor>,
    /// Continuation stack.
    frames: Vec<Frame>,
    /// This fiber's fiber-ref values.
    fiber_refs: HashMap<u64, RefEntry>,
}

/// Where a live fiber currently is.
enum ExecStatus {
    /// In a turn, or queued for one.
    Running,
    /// Parked on an async registration.
    Suspended {
        /// Guards resumption: only a resume carrying this epoch wins.
        epoch: u64,
        /// Whether interruption may tear the suspension down.
        interruptible: bool,
        /// Cancellation action recorded by the registration, if any.
        canceler: Option<Canceler>,
    },
}

/// Shared lifecycle cell, observed and poked by other fibers.
enum FiberState {
    Executing {
        status: ExecStatus,
        observers: Vec<Observer>,
        /// Accumulated interruption requests, not yet delivered.
        interrupted: ErasedCause,
        /// Whether delivery has happened and the fiber is unwinding.
        interrupting: bool,
    },
    Done(ErasedExit),
}

/// The execution state of a single fiber.
pub(crate) struct FiberContext {
    id: FiberId,
    /// Owning fiber, absent for roots and daemons.
    parent: Weak<FiberContext>,
    core: Mutex<Core>,
    state: Mutex<FiberState>,
    /// Live non-daemon children, drained at completion.
    children: Mutex<HashMap<FiberId, Arc<FiberContext>>>,
    /// Finalizer scope closed with the fiber's exit.
    scope: Scope<ErasedExit>,
    /// Supervisor this fiber was started under, notified at completion.
    supervisor: Supervisor,
    reporter: Option<FailureReporter>,
    /// Effect nodes interpreted per turn before yielding back.
    ops_budget: usize,
    /// Fast-path gate for the per-op interruption check.
    interrupt_flag: AtomicBool,
    epochs: AtomicU64,
}

impl FiberContext {
    fn new(
        env: Env,
        interruptible: bool,
        supervisor: Supervisor,
        fiber_refs: HashMap<u64, RefEntry>,
        parent: Weak<FiberContext>,
        reporter: Option<FailureReporter>,
        ops_budget: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: FiberId::new(),
            parent,
            core: Mutex::new(Core {
                env_stack: vec![env],
                status_stack: vec![interruptible],
                supervisor_stack: vec![supervisor.clone()],
                frames: Vec::new(),
                fiber_refs,
            }),
            state: Mutex::new(FiberState::Executing {
                status: ExecStatus::Running,
                observers: Vec::new(),
                interrupted: Cause::Empty,
                interrupting: false,
            }),
            children: Mutex::new(HashMap::new()),
            scope: Scope::new(),
            supervisor,
            reporter,
            ops_budget,
            interrupt_flag: AtomicBool::new(false),
            epochs: AtomicU64::new(0),
        })
    }

    /// Create a root fiber: interruptible, no parent, fresh refs.
    pub(crate) fn root(
        env: Env,
        supervisor: Supervisor,
        reporter: Option<FailureReporter>,
    ) -> Arc<Self> {
        let ctx = Self::new(
            env,
            true,
            supervisor.clone(),
            HashMap::new(),
            Weak::new(),
            reporter,
            config::global().ops_budget,
        );
        supervisor.notify_start(None, &ctx);
        ctx
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    /// Externally observable lifecycle snapshot.
    pub(crate) fn status(&self) -> FiberStatus {
        match &*self.state.lock() {
            FiberState::Done(_) => FiberStatus::Done,
            FiberState::Executing {
                interrupting: true, ..
            } => FiberStatus::Interrupting,
            FiberState::Executing {
                status: ExecStatus::Suspended { .. },
                ..
            } => FiberStatus::Suspended,
            FiberState::Executing { .. } => FiberStatus::Running,
        }
    }

    /// The exit, if the fiber has resolved.
    pub(crate) fn poll(&self) -> Option<ErasedExit> {
        match &*self.state.lock() {
            FiberState::Done(exit) => Some(exit.clone()),
            FiberState::Executing { .. } => None,
        }
    }

    /// Register a completion callback. Fires immediately if the fiber is
    /// already done, otherwise in registration order at completion.
    pub(crate) fn on_done(&self, observer: Observer) {
        let exit = {
            let mut state = self.state.lock();
            match &mut *state {
                FiberState::Executing { observers, .. } => {
                    observers.push(observer);
                    return;
                }
                FiberState::Done(exit) => exit.clone(),
            }
        };
        observer(&exit);
    }

    /// This fiber's current value of a fiber ref.
    pub(crate) fn ref_value(&self, inner: &Arc<FiberRefInner>) -> Val {
        let core = self.core.lock();
        core.fiber_refs
            .get(&inner.key)
            .map(|entry| entry.value.clone())
            .unwrap_or_else(|| inner.initial.clone())
    }

    /// Record an interruption request attributed to `by`.
    ///
    /// The request is durable. If the fiber is suspended at an
    /// interruptible point the suspension is torn down now: the recorded
    /// canceler runs and the fiber is rescheduled to observe the request.
    /// Otherwise the running turn picks it up at its next interruptible
    /// point.
    pub(crate) fn signal_interrupt(self: &Arc<Self>, by: FiberId) {
        let mut canceler = None;
        let mut resume = false;
        {
            let mut state = self.state.lock();
            match &mut *state {
                FiberState::Done(_) => return,
                FiberState::Executing {
                    status,
                    interrupted,
                    ..
                } => {
                    let so_far = mem::replace(interrupted, Cause::Empty);
                    *interrupted = Cause::then(so_far, Cause::interrupt(by));
                    self.interrupt_flag.store(true, Ordering::Release);
                    if let ExecStatus::Suspended {
                        interruptible: true,
                        canceler: slot,
                        ..
                    } = status
                    {
                        canceler = slot.take();
                        *status = ExecStatus::Running;
                        resume = true;
                    }
                }
            }
        }
        if let Some(cancel) = canceler {
            cancel();
        }
        if resume {
            // the placeholder value never reaches a continuation: the
            // turn's entry check converts it into the interrupt failure
            self.evaluate_later(Arc::new(EffectRepr::Succeed(erase(()))));
        }
    }

    /// Schedule a turn on the executor.
    pub(crate) fn evaluate_later(self: &Arc<Self>, effect: Arc<EffectRepr>) {
        let this = Arc::clone(self);
        Executor::global().submit(move || this.run_turn(effect));
    }

    /// Run a turn on the calling thread.
    pub(crate) fn evaluate_now(self: &Arc<Self>, effect: Arc<EffectRepr>) {
        self.run_turn(effect);
    }

    // ========================================================================
    // TURN LOOP
    // ========================================================================

    fn run_turn(self: &Arc<Self>, mut current: Arc<EffectRepr>) {
        let mut core = self.core.lock();
        let mut ops: usize = 0;
        loop {
            let interruptible = core.status_stack.last().copied().unwrap_or(true);
            if let Some(pending) = self.take_pending_interrupt(interruptible) {
                // an in-flight failure keeps its cause; the interruption
                // is sequenced after it
                let combined = match &*current {
                    EffectRepr::Fail(existing) => Cause::then(existing.clone(), pending),
                    _ => pending,
                };
                current = Arc::new(EffectRepr::Fail(combined));
            }

            ops += 1;
            if ops > self.ops_budget {
                let this = Arc::clone(self);
                drop(core);
                Executor::global().submit(move || this.run_turn(current));
                return;
            }

            // success and failure unwind one frame per iteration, so the
            // interruption check above runs between frames
            current = match &*current {
                EffectRepr::Succeed(value) => match core.frames.pop() {
                    None => {
                        let value = value.clone();
                        drop(core);
                        self.finish(Exit::Success(value));
                        return;
                    }
                    Some(Frame::FlatMap(then)) => then(value.clone()),
                    Some(Frame::Fold { on_success, .. }) => on_success(value.clone()),
                    Some(Frame::Finalizer(finalizer)) => {
                        // run the finalizer uninterruptibly, then resume
                        // with the original value
                        let value = value.clone();
                        Arc::new(EffectRepr::InterruptStatus {
                            effect: Arc::new(EffectRepr::FlatMap {
                                first: finalizer,
                                then: Arc::new(move |_| {
                                    Arc::new(EffectRepr::Succeed(value.clone()))
                                }),
                            }),
                            interruptible: false,
                        })
                    }
                    Some(Frame::PopEnv) => {
                        core.env_stack.pop();
                        Arc::clone(&current)
                    }
                    Some(Frame::PopInterruptStatus) => {
                        core.status_stack.pop();
                        Arc::clone(&current)
                    }
                    Some(Frame::PopSupervisor) => {
                        core.supervisor_stack.pop();
                        Arc::clone(&current)
                    }
                },

                EffectRepr::Fail(cause) => match core.frames.pop() {
                    None => {
                        let cause = cause.clone();
                        drop(core);
                        self.finish(Exit::Failure(cause));
                        return;
                    }
                    Some(Frame::FlatMap(_)) => Arc::clone(&current),
                    Some(Frame::Fold { on_failure, .. }) => {
                        // once interruption is delivered, handlers in
                        // interruptible code are skipped on the way out
                        if self.unwinding_from_interrupt(interruptible) {
                            Arc::clone(&current)
                        } else {
                            if self.interrupt_flag.load(Ordering::Acquire) {
                                self.interrupt_consumed();
                            }
                            on_failure(cause.clone())
                        }
                    }
                    Some(Frame::Finalizer(finalizer)) => {
                        // run the finalizer uninterruptibly, then re-raise,
                        // folding any finalizer failure into the cause
                        let after_failure = cause.clone();
                        let after_success = cause.clone();
                        Arc::new(EffectRepr::InterruptStatus {
                            effect: Arc::new(EffectRepr::Fold {
                                first: finalizer,
                                on_failure: Arc::new(move |fin_cause| {
                                    Arc::new(EffectRepr::Fail(Cause::then(
                                        after_failure.clone(),
                                        fin_cause,
                                    )))
                                }),
                                on_success: Arc::new(move |_| {
                                    Arc::new(EffectRepr::Fail(after_success.clone()))
                                }),
                            }),
                            interruptible: false,
                        })
                    }
                    Some(Frame::PopEnv) => {
                        core.env_stack.pop();
                        Arc::clone(&current)
                    }
                    Some(Frame::PopInterruptStatus) => {
                        core.status_stack.pop();
                        Arc::clone(&current)
                    }
                    Some(Frame::PopSupervisor) => {
                        core.supervisor_stack.pop();
                        Arc::clone(&current)
                    }
                },

                EffectRepr::Total(thunk) => match catch_unwind(AssertUnwindSafe(|| thunk())) {
                    Ok(value) => Arc::new(EffectRepr::Succeed(value)),
                    Err(payload) => Arc::new(EffectRepr::Fail(Cause::Die(Defect::from_panic(
                        payload,
                    )))),
                },

                EffectRepr::Partial { thunk, on_panic } => {
                    match catch_unwind(AssertUnwindSafe(|| thunk())) {
                        Ok(value) => Arc::new(EffectRepr::Succeed(value)),
                        Err(payload) => Arc::new(EffectRepr::Fail(Cause::Fail(on_panic(
                            Defect::from_panic(payload),
                        )))),
                    }
                }

                EffectRepr::FlatMap { first, then } => {
                    core.frames.push(Frame::FlatMap(Arc::clone(then)));
                    Arc::clone(first)
                }

                EffectRepr::Fold {
                    first,
                    on_failure,
                    on_success,
                } => {
                    core.frames.push(Frame::Fold {
                        on_failure: Arc::clone(on_failure),
                        on_success: Arc::clone(on_success),
                    });
                    Arc::clone(first)
                }

                EffectRepr::Ensuring { first, finalizer } => {
                    core.frames.push(Frame::Finalizer(Arc::clone(finalizer)));
                    Arc::clone(first)
                }

                EffectRepr::Async { register } => {
                    let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
                    {
                        let mut state = self.state.lock();
                        if let FiberState::Executing { status, .. } = &mut *state {
                            *status = ExecStatus::Suspended {
                                epoch,
                                interruptible,
                                canceler: None,
                            };
                        }
                    }
                    let resume = AsyncResume {
                        ctx: Arc::clone(self),
                        epoch,
                    };
                    let mut canceler = register(resume);
                    if canceler.is_some() {
                        let run_now = {
                            let mut state = self.state.lock();
                            match &mut *state {
                                FiberState::Executing {
                                    status:
                                        ExecStatus::Suspended {
                                            epoch: current_epoch,
                                            canceler: slot,
                                            ..
                                        },
                                    ..
                                } if *current_epoch == epoch => {
                                    *slot = canceler.take();
                                    false
                                }
                                // the suspension was already torn down; if
                                // that was interruption, the late canceler
                                // still must run
                                FiberState::Executing {
                                    interrupted,
                                    interrupting,
                                    ..
                                } => *interrupting || !interrupted.is_empty(),
                                FiberState::Done(_) => false,
                            }
                        };
                        if run_now {
                            if let Some(cancel) = canceler {
                                cancel();
                            }
                        }
                    }
                    return;
                }

                EffectRepr::Fork {
                    effect,
                    daemon,
                    wrap,
                } => {
                    let child = self.fork_child(&mut core, *daemon);
                    child.evaluate_later(Arc::clone(effect));
                    Arc::new(EffectRepr::Succeed(wrap(child)))
                }

                EffectRepr::Read(f) => {
                    let env = core.env_stack.last().cloned().unwrap_or_default();
                    f(&env)
                }

                EffectRepr::Provide { effect, env } => {
                    core.env_stack.push(env.clone());
                    core.frames.push(Frame::PopEnv);
                    Arc::clone(effect)
                }

                EffectRepr::CheckInterrupt(f) => f(interruptible),

                EffectRepr::InterruptStatus {
                    effect,
                    interruptible,
                } => {
                    core.status_stack.push(*interruptible);
                    core.frames.push(Frame::PopInterruptStatus);
                    Arc::clone(effect)
                }

                EffectRepr::Supervise { effect, supervisor } => {
                    core.supervisor_stack.push(supervisor.clone());
                    core.frames.push(Frame::PopSupervisor);
                    Arc::clone(effect)
                }

                EffectRepr::FiberRefNew { make } => {
                    let (inner, handle) = make();
                    let key = inner.key;
                    core.fiber_refs.insert(
                        key,
                        RefEntry {
                            value: inner.initial.clone(),
                            inner,
                        },
                    );
                    Arc::new(EffectRepr::Succeed(handle))
                }

                EffectRepr::FiberRefModify { inner, modify } => {
                    let entry = core.fiber_refs.entry(inner.key).or_insert_with(|| RefEntry {
                        value: inner.initial.clone(),
                        inner: Arc::clone(inner),
                    });
                    let (out, next) = modify(&entry.value);
                    entry.value = next;
                    Arc::new(EffectRepr::Succeed(out))
                }

                EffectRepr::InheritRefs(source) => {
                    // the source fiber is done by the time its refs are
                    // inherited, so its core lock is uncontended
                    if !Arc::ptr_eq(source, self) {
                        let source_core = source.core.lock();
                        for (key, theirs) in &source_core.fiber_refs {
                            let merged = match core.fiber_refs.get(key) {
                                Some(mine) => (theirs.inner.join)(&mine.value, &theirs.value),
                                None => (theirs.inner.join)(&theirs.inner.initial, &theirs.value),
                            };
                            core.fiber_refs.insert(
                                *key,
                                RefEntry {
                                    value: merged,
                                    inner: Arc::clone(&theirs.inner),
                                },
                            );
                        }
                    }
                    Arc::new(EffectRepr::Succeed(erase(())))
                }

                EffectRepr::GetDescriptor(f) => f(FiberDescriptor {
                    id: self.id,
                    interruptible,
                }),

                EffectRepr::Yield => {
                    let this = Arc::clone(self);
                    drop(core);
                    Executor::global()
                        .submit(move || this.run_turn(Arc::new(EffectRepr::Succeed(erase(())))));
                    return;
                }
            };
        }
    }

    /// Deliver a pending interruption request if the fiber is at an
    /// interruptible point and not already unwinding from one.
    fn take_pending_interrupt(&self, interruptible: bool) -> Option<ErasedCause> {
        if !interruptible || !self.interrupt_flag.load(Ordering::Acquire) {
            return None;
        }
        let mut state = self.state.lock();
        if let FiberState::Executing {
            interrupted,
            interrupting,
            ..
        } = &mut *state
        {
            if !*interrupting && !interrupted.is_empty() {
                *interrupting = true;
                return Some(interrupted.clone());
            }
        }
        None
    }

    /// Whether the fiber is unwinding from a delivered interruption while
    /// in interruptible code. Failure handlers are skipped in that state;
    /// handlers inside uninterruptible regions still run.
    fn unwinding_from_interrupt(&self, interruptible: bool) -> bool {
        if !interruptible || !self.interrupt_flag.load(Ordering::Acquire) {
            return false;
        }
        matches!(
            &*self.state.lock(),
            FiberState::Executing {
                interrupting: true,
                ..
            }
        )
    }

    /// A failure handler is consuming the in-flight cause: the unwind is
    /// over. The durable request stays recorded, so if the cause carried a
    /// delivered interruption it is delivered again at the next
    /// interruptible point.
    fn interrupt_consumed(&self) {
        let mut state = self.state.lock();
        if let FiberState::Executing { interrupting, .. } = &mut *state {
            *interrupting = false;
        }
    }

    // ========================================================================
    // FORK AND COMPLETION
    // ========================================================================

    /// Create a child fiber inheriting this fiber's current environment,
    /// interrupt status, supervisor, and forked fiber-ref values.
    fn fork_child(self: &Arc<Self>, core: &mut Core, daemon: bool) -> Arc<FiberContext> {
        let env = core.env_stack.last().cloned().unwrap_or_default();
        let interruptible = core.status_stack.last().copied().unwrap_or(true);
        let supervisor = core
            .supervisor_stack
            .last()
            .cloned()
            .unwrap_or_else(Supervisor::none);

        let mut refs = HashMap::with_capacity(core.fiber_refs.len());
        for (key, entry) in &core.fiber_refs {
            refs.insert(
                *key,
                RefEntry {
                    value: (entry.inner.fork)(&entry.value),
                    inner: Arc::clone(&entry.inner),
                },
            );
        }

        let parent = if daemon {
            Weak::new()
        } else {
            Arc::downgrade(self)
        };
        let child = FiberContext::new(
            env,
            interruptible,
            supervisor.clone(),
            refs,
            parent,
            self.reporter.clone(),
            self.ops_budget,
        );
        if !daemon {
            self.children.lock().insert(child.id, Arc::clone(&child));
        }
        supervisor.notify_start(Some(self.id), &child);
        child
    }

    /// The fiber's own evaluation is over: interrupt live children, wait
    /// for their exits, then publish.
    fn finish(self: &Arc<Self>, exit: ErasedExit) {
        let children: Vec<Arc<FiberContext>> = {
            let mut children = self.children.lock();
            children.drain().map(|(_, child)| child).collect()
        };
        if children.is_empty() {
            self.complete(exit);
            return;
        }

        let remaining = Arc::new(AtomicUsize::new(children.len()));
        let exit = Arc::new(Mutex::new(Some(exit)));
        for child in children {
            child.signal_interrupt(self.id);
            let this = Arc::clone(self);
            let remaining = Arc::clone(&remaining);
            let exit = Arc::clone(&exit);
            child.on_done(Box::new(move |_| {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    if let Some(exit) = exit.lock().take() {
                        this.complete(exit);
                    }
                }
            }));
        }
    }

    /// Close the scope, publish the exit, and detach from the tree.
    fn complete(self: &Arc<Self>, exit: ErasedExit) {
        let mut exit = exit;
        if let Some(defects) = self.scope.close(exit.clone()) {
            if let Some(finalizer_cause) = defects
                .into_iter()
                .map(Cause::Die)
                .reduce(|left, right| Cause::then(left, right))
            {
                exit = Exit::Failure(Cause::then(exit.erased_cause(), finalizer_cause));
            }
        }

        let observers = {
            let mut state = self.state.lock();
            if matches!(&*state, FiberState::Done(_)) {
                return;
            }
            match mem::replace(&mut *state, FiberState::Done(exit.clone())) {
                FiberState::Executing { observers, .. } => observers,
                FiberState::Done(_) => Vec::new(),
            }
        };

        if observers.is_empty() {
            if let Exit::Failure(cause) = &exit {
                if !cause.interrupted_only() {
                    if let Some(reporter) = &self.reporter {
                        reporter(self.id, cause);
                    }
                }
            }
        }
        for observer in observers {
            observer(&exit);
        }

        self.supervisor.notify_end(self.id);
        if let Some(parent) = self.parent.upgrade() {
            parent.children.lock().remove(&self.id);
        }
    }
}

/// Resume handle for a suspended fiber.
///
/// Epoch-guarded: only the first resume against the suspension it was
/// issued for wins; later invocations, and invocations after the fiber was
/// interrupted out of the suspension, are no-ops.
#[derive(Clone)]
pub struct AsyncResume {
    ctx: Arc<FiberContext>,
    epoch: u64,
}

impl AsyncResume {
    pub(crate) fn resume(&self, exit: ErasedExit) {
        let won = {
            let mut state = self.ctx.state.lock();
            match &mut *state {
                FiberState::Executing { status, .. } => match status {
                    ExecStatus::Suspended { epoch, .. } if *epoch == self.epoch => {
                        *status = ExecStatus::Running;
                        true
                    }
                    _ => false,
                },
                FiberState::Done(_) => false,
            }
        };
        if won {
            let repr = match exit {
                Exit::Success(value) => EffectRepr::Succeed(value),
                Exit::Failure(cause) => EffectRepr::Fail(cause),
            };
            self.ctx.evaluate_later(Arc::new(repr));
        }
    }
}
