//! Fiber Exits
//!
//! An `Exit` is the terminal, immutable result of a fiber: either a success
//! value or a full failure [`Cause`]. Every fiber resolves to exactly one
//! `Exit`, delivered to all of its observers.

use std::any::Any;
use std::fmt;

use crate::cause::{Cause, ErasedCause, SquashedError};
use crate::fiber::FiberId;

/// Terminal result of a fiber or effect evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit<A, E> {
    /// The computation succeeded.
    Success(A),
    /// The computation failed with a full cause.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// A successful exit.
    pub fn succeed(value: A) -> Self {
        Exit::Success(value)
    }

    /// A failed exit with a single typed failure.
    pub fn fail(error: E) -> Self {
        Exit::Failure(Cause::fail(error))
    }

    /// A failed exit with a single defect.
    pub fn die<T: Any + Send + Sync + fmt::Debug>(payload: T) -> Self {
        Exit::Failure(Cause::die(payload))
    }

    /// An interrupted exit attributed to `by`.
    pub fn interrupt(by: FiberId) -> Self {
        Exit::Failure(Cause::interrupt(by))
    }

    /// A failed exit with an arbitrary cause.
    pub fn halt(cause: Cause<E>) -> Self {
        Exit::Failure(cause)
    }

    /// Convert from a plain `Result`.
    pub fn from_result(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Exit::Success(a),
            Err(e) => Exit::Failure(Cause::fail(e)),
        }
    }

    /// Whether this exit is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    /// Whether this exit is a failure of any kind.
    pub fn is_failure(&self) -> bool {
        matches!(self, Exit::Failure(_))
    }

    /// Whether this exit is an interruption with no other failure.
    pub fn is_interrupted_only(&self) -> bool {
        match self {
            Exit::Failure(cause) => cause.interrupted_only(),
            Exit::Success(_) => false,
        }
    }

    /// The failure cause, if any.
    pub fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Exit::Failure(cause) => Some(cause),
            Exit::Success(_) => None,
        }
    }

    /// Transform the success value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B, E> {
        match self {
            Exit::Success(a) => Exit::Success(f(a)),
            Exit::Failure(c) => Exit::Failure(c),
        }
    }

    /// Transform every typed failure.
    pub fn map_error<E2>(self, f: impl Fn(E) -> E2 + Copy) -> Exit<A, E2> {
        match self {
            Exit::Success(a) => Exit::Success(a),
            Exit::Failure(c) => Exit::Failure(c.map(f)),
        }
    }

    /// Collapse to a `Result`, squashing the cause to one error.
    pub fn into_result(self) -> Result<A, SquashedError<E>>
    where
        E: Clone,
    {
        match self {
            Exit::Success(a) => Ok(a),
            Exit::Failure(c) => Err(c.squash()),
        }
    }
}

/// The exit form the interpreter operates on: success values and error
/// types are erased.
pub(crate) type ErasedExit = Exit<crate::effect::Val, crate::cause::ErasedError>;

impl ErasedExit {
    /// Recover the typed exit. Types are guaranteed by the phantom-typed
    /// effect surface.
    pub(crate) fn reify<A, E>(self) -> Exit<A, E>
    where
        A: Any + Clone + Send + Sync,
        E: Any + Clone + Send + Sync,
    {
        match self {
            Exit::Success(v) => Exit::Success(
                v.downcast_ref::<A>()
                    .cloned()
                    .expect("success type mismatch"),
            ),
            Exit::Failure(c) => Exit::Failure(c.reify::<E>()),
        }
    }

    /// The failure cause of this exit, or empty for successes.
    pub(crate) fn erased_cause(&self) -> ErasedCause {
        match self {
            Exit::Success(_) => Cause::Empty,
            Exit::Failure(c) => c.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_predicates() {
        let exit: Exit<i32, &str> = Exit::succeed(1);
        assert!(exit.is_success());
        assert!(!exit.is_failure());
        assert!(exit.cause().is_none());
    }

    #[test]
    fn test_failure_keeps_cause() {
        let exit: Exit<i32, &str> = Exit::fail("boom");
        assert!(exit.is_failure());
        assert!(exit.cause().is_some_and(Cause::failed));
        assert!(!exit.cause().is_some_and(Cause::died));
    }

    #[test]
    fn test_interrupted_only() {
        let exit: Exit<i32, &str> = Exit::interrupt(FiberId::for_test(1));
        assert!(exit.is_interrupted_only());

        let mixed: Exit<i32, &str> = Exit::halt(Cause::then(
            Cause::interrupt(FiberId::for_test(1)),
            Cause::fail("also failed"),
        ));
        assert!(!mixed.is_interrupted_only());
    }

    #[test]
    fn test_map_and_into_result() {
        let exit: Exit<i32, String> = Exit::succeed(20);
        assert_eq!(exit.map(|n| n * 2).into_result(), Ok(40));

        let exit: Exit<i32, String> = Exit::fail("nope".into());
        assert_eq!(
            exit.into_result(),
            Err(SquashedError::Error("nope".to_string()))
        );
    }
}
