//! Fiber Supervision
//!
//! A [`Supervisor`] observes the lifecycle of fibers forked within the
//! subtree it is attached to: it is notified when a child fiber starts and
//! when it ends. Supervisors compose by zipping, so several observers can
//! watch the same subtree.
//!
//! The built-in tracking supervisor keeps the set of currently live
//! fibers; the runtime's signal-aware entry point uses a global one to
//! drain stragglers during teardown.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::context::FiberContext;
use crate::fiber::FiberId;

/// User-implementable observer of fiber lifecycle events.
pub trait Supervise: Send + Sync {
    /// A fiber started under the supervised subtree.
    fn on_start(&self, parent: Option<FiberId>, fiber: FiberId);

    /// A previously started fiber resolved to an exit.
    fn on_end(&self, fiber: FiberId);
}

#[derive(Clone)]
enum SupervisorKind {
    /// No observation.
    None,
    /// Keep the set of live fibers.
    Track(Arc<TrackState>),
    /// Delegate to user callbacks.
    Custom(Arc<dyn Supervise>),
    /// Notify both.
    Zip(Arc<Supervisor>, Arc<Supervisor>),
}

struct TrackState {
    running: Mutex<HashMap<FiberId, Arc<FiberContext>>>,
}

/// Composable observer attached to a fiber subtree.
#[derive(Clone)]
pub struct Supervisor {
    kind: SupervisorKind,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match &self.kind {
            SupervisorKind::None => "none",
            SupervisorKind::Track(_) => "tracking",
            SupervisorKind::Custom(_) => "custom",
            SupervisorKind::Zip(_, _) => "zip",
        };
        write!(f, "Supervisor({name})")
    }
}

impl Supervisor {
    /// A supervisor that observes nothing.
    pub fn none() -> Self {
        Self {
            kind: SupervisorKind::None,
        }
    }

    /// A supervisor that tracks the set of live fibers.
    pub fn tracking() -> Self {
        Self {
            kind: SupervisorKind::Track(Arc::new(TrackState {
                running: Mutex::new(HashMap::new()),
            })),
        }
    }

    /// A supervisor from a [`Supervise`] implementation.
    pub fn from_supervise(observer: Arc<dyn Supervise>) -> Self {
        Self {
            kind: SupervisorKind::Custom(observer),
        }
    }

    /// A supervisor from start/end callbacks.
    pub fn from_fn(
        on_start: impl Fn(Option<FiberId>, FiberId) + Send + Sync + 'static,
        on_end: impl Fn(FiberId) + Send + Sync + 'static,
    ) -> Self {
        struct FnSupervise<S, E> {
            on_start: S,
            on_end: E,
        }
        impl<S, E> Supervise for FnSupervise<S, E>
        where
            S: Fn(Option<FiberId>, FiberId) + Send + Sync,
            E: Fn(FiberId) + Send + Sync,
        {
            fn on_start(&self, parent: Option<FiberId>, fiber: FiberId) {
                (self.on_start)(parent, fiber);
            }
            fn on_end(&self, fiber: FiberId) {
                (self.on_end)(fiber);
            }
        }
        Self::from_supervise(Arc::new(FnSupervise { on_start, on_end }))
    }

    /// Compose two supervisors; both observe every event.
    pub fn zip(self, other: Supervisor) -> Self {
        match (&self.kind, &other.kind) {
            (SupervisorKind::None, _) => other,
            (_, SupervisorKind::None) => self,
            _ => Self {
                kind: SupervisorKind::Zip(Arc::new(self), Arc::new(other)),
            },
        }
    }

    /// Whether this supervisor observes nothing.
    pub fn is_none(&self) -> bool {
        matches!(self.kind, SupervisorKind::None)
    }

    /// Ids of currently live fibers, for tracking supervisors (zips take
    /// the union).
    pub fn running(&self) -> Vec<FiberId> {
        self.contexts().iter().map(|c| c.id()).collect()
    }

    /// Number of currently live fibers, for tracking supervisors.
    pub fn running_count(&self) -> usize {
        self.contexts().len()
    }

    pub(crate) fn contexts(&self) -> Vec<Arc<FiberContext>> {
        match &self.kind {
            SupervisorKind::Track(state) => state.running.lock().values().cloned().collect(),
            SupervisorKind::Zip(l, r) => {
                let mut out = l.contexts();
                for ctx in r.contexts() {
                    if !out.iter().any(|c| c.id() == ctx.id()) {
                        out.push(ctx);
                    }
                }
                out
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn notify_start(&self, parent: Option<FiberId>, fiber: &Arc<FiberContext>) {
        match &self.kind {
            SupervisorKind::None => {}
            SupervisorKind::Track(state) => {
                state.running.lock().insert(fiber.id(), Arc::clone(fiber));
            }
            SupervisorKind::Custom(observer) => observer.on_start(parent, fiber.id()),
            SupervisorKind::Zip(l, r) => {
                l.notify_start(parent, fiber);
                r.notify_start(parent, fiber);
            }
        }
    }

    pub(crate) fn notify_end(&self, fiber: FiberId) {
        match &self.kind {
            SupervisorKind::None => {}
            SupervisorKind::Track(state) => {
                state.running.lock().remove(&fiber);
            }
            SupervisorKind::Custom(observer) => observer.on_end(fiber),
            SupervisorKind::Zip(l, r) => {
                l.notify_end(fiber);
                r.notify_end(fiber);
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::none()
    }
}

/// The process-wide tracking supervisor used by the runtime entry points.
pub(crate) fn global_tracking() -> &'static Supervisor {
    static GLOBAL: OnceLock<Supervisor> = OnceLock::new();
    GLOBAL.get_or_init(Supervisor::tracking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_none_observes_nothing() {
        let sup = Supervisor::none();
        assert!(sup.is_none());
        assert_eq!(sup.running_count(), 0);
    }

    #[test]
    fn test_zip_with_none_is_identity() {
        let tracking = Supervisor::tracking();
        let zipped = tracking.clone().zip(Supervisor::none());
        assert!(matches!(zipped.kind, SupervisorKind::Track(_)));
    }

    #[test]
    fn test_from_fn_receives_events() {
        let starts = Arc::new(AtomicUsize::new(0));
        let ends = Arc::new(AtomicUsize::new(0));
        let sup = {
            let starts = Arc::clone(&starts);
            let ends = Arc::clone(&ends);
            Supervisor::from_fn(
                move |_, _| {
                    starts.fetch_add(1, Ordering::SeqCst);
                },
                move |_| {
                    ends.fetch_add(1, Ordering::SeqCst);
                },
            )
        };
        sup.notify_end(FiberId::for_test(1));
        assert_eq!(starts.load(Ordering::SeqCst), 0);
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }
}
