//! Finalizer Scopes
//!
//! A [`Scope`] is a hierarchical registry of finalizers tied to the
//! lifetime of a fiber or resource. Closing a scope runs its finalizers
//! exactly once, in reverse registration order, then recursively closes
//! child scopes that were never promoted out.
//!
//! Scopes never reopen. Registering a finalizer on an already-closed scope
//! runs it immediately, since there is nothing left to wait for.
//!
//! # Example
//!
//! ```rust,ignore
//! use ichor::scope::Scope;
//!
//! let scope: Scope<i32> = Scope::new();
//! let key = scope.add_finalizer(|exit| println!("closing with {exit}"));
//! scope.remove_finalizer(key); // deregistered, will not run
//! scope.close(0);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::Mutex;
use std::sync::Arc;

use crate::cause::Defect;
use crate::log;

type Finalizer<A> = Box<dyn FnOnce(&A) + Send>;

/// Handle for removing a registered finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizerKey(u64);

/// A no-op key, returned when registration happened on a closed scope.
const NOOP_KEY: FinalizerKey = FinalizerKey(0);

struct ScopeState<A> {
    /// The close value, present once the scope is closed.
    closed: Option<A>,
    next_key: u64,
    /// Finalizers in registration order.
    finalizers: Vec<(FinalizerKey, Finalizer<A>)>,
    /// Child scopes closed together with this one unless promoted.
    children: Vec<Scope<A>>,
}

/// A growable finalizer registry with a single close point.
pub struct Scope<A> {
    inner: Arc<Mutex<ScopeState<A>>>,
}

impl<A> Clone for Scope<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> std::fmt::Debug for Scope<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Scope(closed: {})",
            self.inner.lock().closed.is_some()
        )
    }
}

impl<A> Default for Scope<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Scope<A> {
    /// A new open scope.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScopeState {
                closed: None,
                next_key: 1,
                finalizers: Vec::new(),
                children: Vec::new(),
            })),
        }
    }

    /// Whether the scope has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    /// Remove a previously registered finalizer. Returns whether it was
    /// still pending.
    pub fn remove_finalizer(&self, key: FinalizerKey) -> bool {
        if key == NOOP_KEY {
            return false;
        }
        let mut state = self.inner.lock();
        let before = state.finalizers.len();
        state.finalizers.retain(|(k, _)| *k != key);
        state.finalizers.len() != before
    }
}

impl<A: Clone + Send + 'static> Scope<A> {
    /// Register a finalizer to run when the scope closes.
    ///
    /// If the scope is already closed, the finalizer runs immediately with
    /// the stored close value and a no-op key is returned.
    pub fn add_finalizer(&self, f: impl FnOnce(&A) + Send + 'static) -> FinalizerKey {
        self.add_boxed(Box::new(f))
    }

    fn add_boxed(&self, f: Finalizer<A>) -> FinalizerKey {
        let closed_value = {
            let mut state = self.inner.lock();
            match &state.closed {
                None => {
                    let key = FinalizerKey(state.next_key);
                    state.next_key += 1;
                    state.finalizers.push((key, f));
                    return key;
                }
                Some(value) => value.clone(),
            }
        };
        if let Some(defect) = run_finalizer(f, &closed_value) {
            log::warn(format!(
                "finalizer on closed scope panicked: {}",
                defect.message()
            ));
        }
        NOOP_KEY
    }

    /// Move a pending finalizer to `target`, so it no longer runs when
    /// this scope closes but when `target` does. Returns whether the
    /// finalizer was still pending here.
    pub fn extend(&self, key: FinalizerKey, target: &Scope<A>) -> bool {
        if key == NOOP_KEY {
            return false;
        }
        let finalizer = {
            let mut state = self.inner.lock();
            match state.finalizers.iter().position(|(k, _)| *k == key) {
                Some(idx) => state.finalizers.remove(idx).1,
                None => return false,
            }
        };
        target.add_boxed(finalizer);
        true
    }

    /// Open a child scope. The child closes together with this scope
    /// unless promoted out of it first.
    ///
    /// A child opened on an already-closed scope is itself closed.
    pub fn child(&self) -> Scope<A> {
        let mut state = self.inner.lock();
        let child = Scope::new();
        match &state.closed {
            None => state.children.push(child.clone()),
            Some(value) => {
                let value = value.clone();
                drop(state);
                child.close(value);
            }
        }
        child
    }

    /// Detach a child scope from this one, so it survives this scope's
    /// close. Returns whether the child was still attached.
    pub fn promote(&self, child: &Scope<A>) -> bool {
        let mut state = self.inner.lock();
        let before = state.children.len();
        state
            .children
            .retain(|c| !Arc::ptr_eq(&c.inner, &child.inner));
        state.children.len() != before
    }

    /// Close the scope with the given value.
    ///
    /// Idempotent: the first call runs every registered finalizer exactly
    /// once, most recently added first, then closes attached children.
    /// Returns `None` if the scope was already closed, otherwise the
    /// defects raised by panicking finalizers (never propagated as a
    /// panic out of `close`).
    pub fn close(&self, value: A) -> Option<Vec<Defect>> {
        let (finalizers, children) = {
            let mut state = self.inner.lock();
            if state.closed.is_some() {
                return None;
            }
            state.closed = Some(value.clone());
            (
                std::mem::take(&mut state.finalizers),
                std::mem::take(&mut state.children),
            )
        };

        let mut defects = Vec::new();
        for (_, finalizer) in finalizers.into_iter().rev() {
            if let Some(defect) = run_finalizer(finalizer, &value) {
                defects.push(defect);
            }
        }
        for child in children {
            if let Some(child_defects) = child.close(value.clone()) {
                defects.extend(child_defects);
            }
        }
        Some(defects)
    }
}

fn run_finalizer<A>(finalizer: Finalizer<A>, value: &A) -> Option<Defect> {
    match catch_unwind(AssertUnwindSafe(|| finalizer(value))) {
        Ok(()) => None,
        Err(payload) => Some(Defect::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_finalizers_run_in_reverse_order() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let scope: Scope<u32> = Scope::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            scope.add_finalizer(move |_| order.lock().unwrap().push(i));
        }
        scope.close(0);
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let scope: Scope<u32> = Scope::new();
        {
            let count = Arc::clone(&count);
            scope.add_finalizer(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(scope.close(1).is_some());
        assert!(scope.close(2).is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_add_after_close_runs_immediately() {
        let ran = Arc::new(AtomicUsize::new(0));
        let scope: Scope<u32> = Scope::new();
        scope.close(7);

        let ran2 = Arc::clone(&ran);
        let key = scope.add_finalizer(move |value| {
            assert_eq!(*value, 7);
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(key, NOOP_KEY);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_finalizer() {
        let count = Arc::new(AtomicUsize::new(0));
        let scope: Scope<u32> = Scope::new();
        let key = {
            let count = Arc::clone(&count);
            scope.add_finalizer(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(scope.remove_finalizer(key));
        assert!(!scope.remove_finalizer(key));
        scope.close(0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_children_close_with_parent_unless_promoted() {
        let closed = Arc::new(AtomicUsize::new(0));
        let parent: Scope<u32> = Scope::new();
        let kept = parent.child();
        let promoted = parent.child();
        for child in [&kept, &promoted] {
            let closed = Arc::clone(&closed);
            child.add_finalizer(move |_| {
                closed.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(parent.promote(&promoted));
        parent.close(0);

        assert!(kept.is_closed());
        assert!(!promoted.is_closed());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_extend_moves_a_finalizer_to_the_target() {
        let count = Arc::new(AtomicUsize::new(0));
        let source: Scope<u32> = Scope::new();
        let target: Scope<u32> = Scope::new();
        let key = {
            let count = Arc::clone(&count);
            source.add_finalizer(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(source.extend(key, &target));
        source.close(0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        target.close(0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_finalizers_are_aggregated() {
        let scope: Scope<u32> = Scope::new();
        scope.add_finalizer(|_| panic!("first"));
        scope.add_finalizer(|_| panic!("second"));
        let defects = scope.close(0).unwrap();
        // reverse order: most recently added runs (and fails) first
        assert_eq!(defects.len(), 2);
        assert_eq!(defects[0].message(), "second");
        assert_eq!(defects[1].message(), "first");
    }

    #[test]
    fn test_child_of_closed_scope_is_closed() {
        let parent: Scope<u32> = Scope::new();
        parent.close(3);
        let child = parent.child();
        assert!(child.is_closed());
    }
}
