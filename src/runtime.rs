//! Runtime Entry Points
//!
//! The bridge between ordinary Rust and effect evaluation. A [`Runtime`]
//! bundles the environment and supervisor that root fibers start with and
//! offers the ways in:
//!
//! - [`Runtime::run`] / [`Runtime::run_asap`]: start a root fiber and
//!   return its handle without blocking.
//! - [`Runtime::run_sync_exit`] / [`Runtime::run_sync`]: evaluate on the
//!   calling thread, blocking for async portions, and return the result.
//! - [`Runtime::run_cancel`]: interrupt a running fiber and block for its
//!   exit.
//! - [`Runtime::run_main`]: the whole-program entry point; reacts to
//!   SIGTERM/SIGINT by interrupting the root fiber and draining tracked
//!   stragglers before producing an exit code.
//!
//! Blocking entry points must not be called from inside an effect; that
//! would park an executor worker on its own work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select};

use crate::config;
use crate::context::{FailureReporter, FiberContext};
use crate::effect::{Effect, ErrorValue, Value};
use crate::env::Env;
use crate::exit::{ErasedExit, Exit};
use crate::fiber::{Fiber, FiberId};
use crate::log::{self, LogBuilder, LogLevel};
use crate::signal::{self, Signal};
use crate::supervisor::{self, Supervisor};

/// Substitutable pieces of [`Runtime::run_main`].
#[derive(Clone, Default)]
pub struct MainOptions {
    hook: Option<Arc<dyn Fn(Signal) + Send + Sync>>,
    teardown: Option<Arc<dyn Fn(&Supervisor, Duration) + Send + Sync>>,
}

impl MainOptions {
    /// Default options: no hook, default straggler drain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the shutdown signal before the root fiber is interrupted.
    pub fn with_hook(mut self, hook: impl Fn(Signal) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Replace the default drain of tracked fibers that runs after the
    /// root fiber's exit. Receives the tracking supervisor and the
    /// configured graceful-shutdown window.
    pub fn with_teardown(
        mut self,
        teardown: impl Fn(&Supervisor, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.teardown = Some(Arc::new(teardown));
        self
    }
}

impl std::fmt::Debug for MainOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MainOptions(hook: {}, teardown: {})",
            self.hook.is_some(),
            self.teardown.is_some()
        )
    }
}

/// Environment and supervision that root fibers start with.
#[derive(Clone)]
pub struct Runtime {
    env: Env,
    supervisor: Supervisor,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            env: Env::default_env(),
            supervisor: Supervisor::none(),
        }
    }
}

impl Runtime {
    /// A runtime with the default environment and no supervision.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the root environment.
    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    /// Attach a supervisor observed by every fiber in every root.
    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = self.supervisor.zip(supervisor);
        self
    }

    /// Start `effect` as a root fiber on the executor and return its
    /// handle without waiting.
    ///
    /// Failures that complete with no observer attached are logged.
    pub fn run<A: Value, E: ErrorValue>(&self, effect: &Effect<A, E>) -> Fiber<A, E> {
        let ctx = self.root(Some(failure_reporter()));
        ctx.evaluate_later(Arc::clone(&effect.repr));
        Fiber::from_context(ctx)
    }

    /// Like [`Runtime::run`], but the first turn executes on the calling
    /// thread before the handle is returned.
    pub fn run_asap<A: Value, E: ErrorValue>(&self, effect: &Effect<A, E>) -> Fiber<A, E> {
        let ctx = self.root(Some(failure_reporter()));
        ctx.evaluate_now(Arc::clone(&effect.repr));
        Fiber::from_context(ctx)
    }

    /// Interrupt `fiber` and block until it acknowledges with an exit.
    pub fn run_cancel<A: Value, E: ErrorValue>(&self, fiber: &Fiber<A, E>) -> Exit<A, E> {
        let ctx = Arc::clone(&fiber.context);
        let (tx, rx) = bounded::<ErasedExit>(1);
        ctx.on_done(Box::new(move |exit| {
            let _ = tx.send(exit.clone());
        }));
        let canceler = FiberId::new();
        ctx.signal_interrupt(canceler);
        match rx.recv() {
            Ok(exit) => exit.reify::<A, E>(),
            Err(_) => Exit::interrupt(canceler),
        }
    }

    /// Evaluate `effect`, blocking the calling thread until it resolves,
    /// and return the full exit.
    pub fn run_sync_exit<A: Value, E: ErrorValue>(&self, effect: &Effect<A, E>) -> Exit<A, E> {
        let ctx = self.root(None);
        let (tx, rx) = bounded::<ErasedExit>(1);
        ctx.on_done(Box::new(move |exit| {
            let _ = tx.send(exit.clone());
        }));
        ctx.evaluate_now(Arc::clone(&effect.repr));
        match rx.recv() {
            Ok(exit) => exit.reify::<A, E>(),
            // unreachable: the observer outlives the fiber
            Err(_) => Exit::die("runtime lost the fiber exit"),
        }
    }

    /// Evaluate `effect`, blocking until it resolves, squashing the cause
    /// on failure.
    pub fn run_sync<A: Value, E: ErrorValue>(
        &self,
        effect: &Effect<A, E>,
    ) -> Result<A, crate::cause::SquashedError<E>> {
        self.run_sync_exit(effect).into_result()
    }

    /// Run `effect` as the program's main fiber and return a process exit
    /// code.
    ///
    /// Installs SIGTERM/SIGINT handlers; a shutdown signal interrupts the
    /// root fiber, then fibers registered with the global tracking
    /// supervisor are interrupted and drained within the configured
    /// graceful-shutdown window. The drain is bounded: fibers still
    /// running when the window lapses are logged and abandoned, not
    /// retried. Success and pure interruption map to 0, any other failure
    /// logs its cause and maps to 1.
    pub fn run_main<A: Value, E: ErrorValue>(&self, effect: &Effect<A, E>) -> i32 {
        self.run_main_with(effect, MainOptions::default())
    }

    /// [`Runtime::run_main`] with a substituted signal hook or teardown.
    pub fn run_main_with<A: Value, E: ErrorValue>(
        &self,
        effect: &Effect<A, E>,
        options: MainOptions,
    ) -> i32 {
        let config = config::global();
        let handler = signal::global_handler();
        handler.install();

        let tracked = supervisor::global_tracking();
        let supervisor = self.supervisor.clone().zip(tracked.clone());
        let ctx = FiberContext::root(self.env.clone(), supervisor, Some(failure_reporter()));

        let (done_tx, done_rx) = bounded::<ErasedExit>(1);
        ctx.on_done(Box::new(move |exit| {
            let _ = done_tx.send(exit.clone());
        }));
        ctx.evaluate_later(Arc::clone(&effect.repr));

        // the waiter polls so it can be stopped once the main fiber
        // resolves without a signal; a plain blocking wait would leave the
        // thread parked for the rest of the process
        let (sig_tx, sig_rx) = bounded::<()>(1);
        let waiter_stop = Arc::new(AtomicBool::new(false));
        let waiter = {
            let stop = Arc::clone(&waiter_stop);
            std::thread::Builder::new()
                .name("ichor-signal-wait".into())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        if signal::global_handler()
                            .wait_for_shutdown(Some(Duration::from_millis(50)))
                        {
                            let _ = sig_tx.send(());
                            return;
                        }
                    }
                })
                .expect("failed to spawn signal wait thread")
        };

        let exit = select! {
            recv(done_rx) -> exit => exit.ok(),
            recv(sig_rx) -> _ => {
                if let Some(hook) = &options.hook {
                    hook(handler.last_signal());
                }
                log::info("shutdown signal received, interrupting main fiber");
                ctx.signal_interrupt(ctx.id());
                done_rx.recv_timeout(config.graceful_shutdown).ok()
            }
        };

        // drain stragglers still registered with the tracking supervisor
        match &options.teardown {
            Some(teardown) => teardown(tracked, config.graceful_shutdown),
            None => {
                for straggler in tracked.contexts() {
                    straggler.signal_interrupt(ctx.id());
                }
                let deadline = Instant::now() + config.graceful_shutdown;
                while tracked.running_count() > 0 && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(10));
                }
                let leftover = tracked.running_count();
                if leftover > 0 {
                    log::warn(format!(
                        "{leftover} fiber(s) did not stop within the shutdown window"
                    ));
                }
            }
        }

        waiter_stop.store(true, Ordering::Release);
        let _ = waiter.join();

        match exit {
            Some(Exit::Success(_)) => 0,
            Some(Exit::Failure(cause)) if cause.interrupted_only() => {
                println!("{}", cause.pretty());
                0
            }
            Some(Exit::Failure(cause)) => {
                log::error(format!("main fiber failed:\n{}", cause.pretty()));
                1
            }
            None => {
                log::error("main fiber did not complete within the shutdown window");
                1
            }
        }
    }

    fn root(&self, reporter: Option<FailureReporter>) -> Arc<FiberContext> {
        FiberContext::root(self.env.clone(), self.supervisor.clone(), reporter)
    }
}

/// The process-wide default runtime.
pub fn default_runtime() -> &'static Runtime {
    static DEFAULT: OnceLock<Runtime> = OnceLock::new();
    DEFAULT.get_or_init(Runtime::new)
}

fn failure_reporter() -> FailureReporter {
    Arc::new(|id, cause| {
        LogBuilder::new(LogLevel::Warn)
            .message("fiber failed with no observer attached")
            .fiber(id)
            .field_str("cause", cause.pretty().trim_end())
            .emit();
    })
}
