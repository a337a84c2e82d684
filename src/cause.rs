//! Failure Causes
//!
//! This module provides the algebraic failure tree used throughout the
//! runtime. A `Cause` distinguishes three kinds of failure:
//!
//! - **Typed failures** (`Fail`): expected errors carried in the effect's
//!   error channel, recoverable by ordinary handlers.
//! - **Defects** (`Die`): unexpected panics, recoverable only by full-cause
//!   handlers, intended to escalate.
//! - **Interruptions** (`Interrupt`): cancellation requests attributed to
//!   the interrupting fiber.
//!
//! Causes compose sequentially (`Then`) and in parallel (`Both`), so a
//! fiber's exit can report every failure that contributed to it rather than
//! just the first one observed. `Empty` is the identity of both compositions.
//!
//! # Example
//!
//! ```rust,ignore
//! use ichor::cause::Cause;
//!
//! let cause = Cause::then(Cause::fail("read failed"), Cause::fail("close failed"));
//! assert!(cause.failed());
//! assert!(!cause.died());
//! println!("{}", cause.pretty());
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::fiber::FiberId;

/// An unexpected failure: the payload of a panic that escaped a thunk.
///
/// The original payload is retained for full-cause handlers that want to
/// inspect it; a best-effort rendered message is captured eagerly so the
/// defect stays printable after the payload type is erased.
#[derive(Clone)]
pub struct Defect {
    payload: Arc<dyn Any + Send + Sync>,
    message: String,
}

impl Defect {
    /// Create a defect from an arbitrary payload.
    pub fn new<T: Any + Send + Sync + fmt::Debug>(payload: T) -> Self {
        let message = format!("{payload:?}");
        Self {
            payload: Arc::new(payload),
            message,
        }
    }

    /// Create a defect from a panic payload as produced by `catch_unwind`.
    ///
    /// Extracts the conventional `&str` / `String` panic messages; anything
    /// else is rendered as an opaque payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            payload: Arc::new(message.clone()),
            message,
        }
    }

    /// The rendered defect message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Attempt to view the original payload as a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Defect({})", self.message)
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl PartialEq for Defect {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for Defect {}

/// An algebraic tree of failure reasons.
///
/// The tree shape is significant: parallel failures keep both branches
/// rather than collapsing to the first, so diagnostics can report every
/// contributing cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// No failure. Identity of `then` and `both`.
    Empty,
    /// A typed, expected failure.
    Fail(E),
    /// An unexpected panic.
    Die(Defect),
    /// Interruption requested by the given fiber.
    Interrupt(FiberId),
    /// Sequential composition: `left` happened, then `right`.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Parallel composition: both happened concurrently.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// A typed failure.
    pub fn fail(error: E) -> Self {
        Cause::Fail(error)
    }

    /// A defect from an arbitrary debuggable payload.
    pub fn die<T: Any + Send + Sync + fmt::Debug>(payload: T) -> Self {
        Cause::Die(Defect::new(payload))
    }

    /// An interruption attributed to `by`.
    pub fn interrupt(by: FiberId) -> Self {
        Cause::Interrupt(by)
    }

    /// Sequential composition, collapsing `Empty` as identity.
    pub fn then(left: Cause<E>, right: Cause<E>) -> Self {
        match (left, right) {
            (Cause::Empty, r) => r,
            (l, Cause::Empty) => l,
            (l, r) => Cause::Then(Box::new(l), Box::new(r)),
        }
    }

    /// Parallel composition, collapsing `Empty` as identity.
    pub fn both(left: Cause<E>, right: Cause<E>) -> Self {
        match (left, right) {
            (Cause::Empty, r) => r,
            (l, Cause::Empty) => l,
            (l, r) => Cause::Both(Box::new(l), Box::new(r)),
        }
    }

    /// Whether this cause carries no failure at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Cause::Empty => true,
            Cause::Then(l, r) | Cause::Both(l, r) => l.is_empty() && r.is_empty(),
            _ => false,
        }
    }

    /// Whether any typed failure occurs in the tree.
    pub fn failed(&self) -> bool {
        match self {
            Cause::Fail(_) => true,
            Cause::Then(l, r) | Cause::Both(l, r) => l.failed() || r.failed(),
            _ => false,
        }
    }

    /// Whether any defect occurs in the tree.
    pub fn died(&self) -> bool {
        match self {
            Cause::Die(_) => true,
            Cause::Then(l, r) | Cause::Both(l, r) => l.died() || r.died(),
            _ => false,
        }
    }

    /// Whether any interruption occurs in the tree.
    pub fn interrupted(&self) -> bool {
        match self {
            Cause::Interrupt(_) => true,
            Cause::Then(l, r) | Cause::Both(l, r) => l.interrupted() || r.interrupted(),
            _ => false,
        }
    }

    /// Whether the cause consists of interruptions only.
    pub fn interrupted_only(&self) -> bool {
        self.interrupted() && !self.failed() && !self.died()
    }

    /// All typed failures, left to right.
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.collect(&mut |c| {
            if let Cause::Fail(e) = c {
                out.push(e);
            }
        });
        out
    }

    /// All defects, left to right.
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.collect(&mut |c| {
            if let Cause::Die(d) = c {
                out.push(d);
            }
        });
        out
    }

    /// All interrupting fiber ids, left to right.
    pub fn interruptors(&self) -> Vec<FiberId> {
        let mut out = Vec::new();
        self.collect(&mut |c| {
            if let Cause::Interrupt(id) = c {
                out.push(*id);
            }
        });
        out
    }

    fn collect<'a>(&'a self, f: &mut impl FnMut(&'a Cause<E>)) {
        match self {
            Cause::Then(l, r) | Cause::Both(l, r) => {
                l.collect(f);
                r.collect(f);
            }
            leaf => f(leaf),
        }
    }

    /// Transform every typed failure in the tree.
    pub fn map<E2>(self, f: impl Fn(E) -> E2 + Copy) -> Cause<E2> {
        match self {
            Cause::Empty => Cause::Empty,
            Cause::Fail(e) => Cause::Fail(f(e)),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt(id) => Cause::Interrupt(id),
            Cause::Then(l, r) => Cause::Then(Box::new(l.map(f)), Box::new(r.map(f))),
            Cause::Both(l, r) => Cause::Both(Box::new(l.map(f)), Box::new(r.map(f))),
        }
    }

    /// Structural reduction over the tree.
    pub fn fold<A>(
        &self,
        empty: &impl Fn() -> A,
        fail: &impl Fn(&E) -> A,
        die: &impl Fn(&Defect) -> A,
        interrupt: &impl Fn(FiberId) -> A,
        then: &impl Fn(A, A) -> A,
        both: &impl Fn(A, A) -> A,
    ) -> A {
        match self {
            Cause::Empty => empty(),
            Cause::Fail(e) => fail(e),
            Cause::Die(d) => die(d),
            Cause::Interrupt(id) => interrupt(*id),
            Cause::Then(l, r) => then(
                l.fold(empty, fail, die, interrupt, then, both),
                r.fold(empty, fail, die, interrupt, then, both),
            ),
            Cause::Both(l, r) => both(
                l.fold(empty, fail, die, interrupt, then, both),
                r.fold(empty, fail, die, interrupt, then, both),
            ),
        }
    }

    /// Re-type a cause that contains no typed failures.
    ///
    /// Returns the original cause untouched if any `Fail` node is present.
    pub fn into_fail_free<E2>(self) -> Result<Cause<E2>, Cause<E>> {
        if self.failed() {
            return Err(self);
        }
        Ok(self.conv_fail_free())
    }

    fn conv_fail_free<E2>(self) -> Cause<E2> {
        match self {
            Cause::Empty => Cause::Empty,
            Cause::Fail(_) => unreachable!("checked fail-free above"),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt(id) => Cause::Interrupt(id),
            Cause::Then(l, r) => Cause::Then(
                Box::new(l.conv_fail_free()),
                Box::new(r.conv_fail_free()),
            ),
            Cause::Both(l, r) => Cause::Both(
                Box::new(l.conv_fail_free()),
                Box::new(r.conv_fail_free()),
            ),
        }
    }

    /// Collapse the tree to a single error value.
    ///
    /// Prefers the first defect, else the first typed failure, else a
    /// synthesized interruption error.
    pub fn squash(&self) -> SquashedError<E>
    where
        E: Clone,
    {
        if let Some(d) = self.defects().first() {
            return SquashedError::Defect((*d).clone());
        }
        if let Some(e) = self.failures().first() {
            return SquashedError::Error((*e).clone());
        }
        SquashedError::Interrupted(self.interruptors().first().copied())
    }

    /// Deterministic multi-line rendering for diagnostics. Side-effect free.
    pub fn pretty(&self) -> String
    where
        E: fmt::Debug,
    {
        let mut out = String::new();
        self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut String, indent: usize)
    where
        E: fmt::Debug,
    {
        let pad = "  ".repeat(indent);
        match self {
            Cause::Empty => {
                out.push_str(&pad);
                out.push_str("(empty cause)\n");
            }
            Cause::Fail(e) => {
                out.push_str(&pad);
                out.push_str(&format!("Failure: {e:?}\n"));
            }
            Cause::Die(d) => {
                out.push_str(&pad);
                out.push_str(&format!("Defect: {}\n", d.message()));
            }
            Cause::Interrupt(id) => {
                out.push_str(&pad);
                out.push_str(&format!("Interrupted by {id}\n"));
            }
            Cause::Then(l, r) => {
                out.push_str(&pad);
                out.push_str("Sequential:\n");
                l.render(out, indent + 1);
                r.render(out, indent + 1);
            }
            Cause::Both(l, r) => {
                out.push_str(&pad);
                out.push_str("Parallel:\n");
                l.render(out, indent + 1);
                r.render(out, indent + 1);
            }
        }
    }
}

/// A cause collapsed to one reportable error.
#[derive(Debug, Clone, PartialEq)]
pub enum SquashedError<E> {
    /// A defect was present.
    Defect(Defect),
    /// No defect, but a typed failure was present.
    Error(E),
    /// Only interruption (or nothing) was present.
    Interrupted(Option<FiberId>),
}

impl<E: fmt::Debug> fmt::Display for SquashedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SquashedError::Defect(d) => write!(f, "fiber died: {d}"),
            SquashedError::Error(e) => write!(f, "fiber failed: {e:?}"),
            SquashedError::Interrupted(Some(id)) => write!(f, "fiber interrupted by {id}"),
            SquashedError::Interrupted(None) => write!(f, "fiber interrupted"),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for SquashedError<E> {}

// ============================================================================
// ERASED FORM
// ============================================================================

/// A typed error with its concrete type erased for the interpreter.
///
/// The interpreter works on untyped values; surface APIs downcast back to
/// the concrete error type when delivering results.
#[derive(Clone)]
pub(crate) struct ErasedError {
    value: Arc<dyn Any + Send + Sync>,
    rendered: String,
}

impl ErasedError {
    pub(crate) fn new<E: Any + Clone + Send + Sync + fmt::Debug>(error: E) -> Self {
        let rendered = format!("{error:?}");
        Self {
            value: Arc::new(error),
            rendered,
        }
    }

    pub(crate) fn downcast<E: Any + Clone + Send + Sync>(&self) -> E {
        self.value
            .downcast_ref::<E>()
            .cloned()
            .expect("error type mismatch")
    }
}

impl fmt::Debug for ErasedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl PartialEq for ErasedError {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for ErasedError {}

/// The cause form the interpreter operates on.
pub(crate) type ErasedCause = Cause<ErasedError>;

impl ErasedCause {
    /// Erase a typed cause.
    pub(crate) fn erase<E: Any + Clone + Send + Sync + fmt::Debug>(cause: Cause<E>) -> Self {
        cause.map(|e| ErasedError::new(e))
    }

    /// Recover the typed cause. The type is guaranteed by the phantom-typed
    /// effect surface.
    pub(crate) fn reify<E: Any + Clone + Send + Sync>(self) -> Cause<E> {
        self.map(|e| e.downcast::<E>())
    }
}
