//! # Ichor Effect Runtime
//!
//! Ichor provides:
//!
//! - **Effects**: Immutable, reusable descriptions of programs with typed
//!   errors (`Effect<A, E>`)
//! - **Fibers**: Lightweight cooperative threads interpreting effects, with
//!   fork/join, structured completion, and two-phase interruption
//! - **Causes**: A composed failure algebra keeping every error, defect,
//!   and interruption that contributed to an exit
//! - **Scopes & FiberRefs**: Finalizers bound to fiber lifetime and
//!   fiber-local state with fork/join semantics
//! - **Runtime**: Entry points from ordinary Rust, including a
//!   signal-aware whole-program main
//!
//! ## Technical Standards
//!
//! Implementation follows these standards:
//!
//! - **Work Stealing**: Based on Chase-Lev deque per
//!   [crossbeam-deque](https://docs.rs/crossbeam-deque)
//! - **Channels**: MPMC channels per
//!   [crossbeam-channel](https://docs.rs/crossbeam-channel)
//! - **Signals**: Unix signal handling per [nix](https://docs.rs/nix)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         ICHOR RUNTIME                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │    Effects   │  │ Interpreter  │  │   Executor   │          │
//! │  │ (effect.rs)  │  │ (context.rs) │  │(executor.rs) │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │    Causes    │  │    Scopes    │  │   Runtime    │          │
//! │  │  (cause.rs)  │  │  (scope.rs)  │  │ (runtime.rs) │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cause;
pub mod config;
pub mod context;
pub mod effect;
pub mod env;
pub mod executor;
pub mod exit;
pub mod fiber;
pub mod fiber_ref;
pub mod log;
pub mod runtime;
pub mod scope;
pub mod signal;
pub mod supervisor;

// Re-exports
pub use cause::{Cause, Defect, SquashedError};
pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use context::AsyncResume;
pub use effect::{AsyncCallback, Canceler, Effect, ErrorValue, Value, UIO};
pub use env::{Clock, Env, RandomSource};
pub use exit::Exit;
pub use fiber::{Fiber, FiberDescriptor, FiberId, FiberStatus};
pub use fiber_ref::FiberRef;
pub use log::{LogFormat, LogLevel};
pub use runtime::{default_runtime, MainOptions, Runtime};
pub use scope::Scope;
pub use signal::{Signal, SignalHandler};
pub use supervisor::Supervisor;

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Evaluate `effect` on the default runtime, blocking until it resolves.
pub fn run_sync<A: Value, E: ErrorValue>(
    effect: &Effect<A, E>,
) -> Result<A, SquashedError<E>> {
    default_runtime().run_sync(effect)
}

/// Run `effect` as the program's main fiber on the default runtime.
///
/// See [`Runtime::run_main`] for signal and exit-code behavior.
pub fn run_main<A: Value, E: ErrorValue>(effect: &Effect<A, E>) -> i32 {
    default_runtime().run_main(effect)
}
