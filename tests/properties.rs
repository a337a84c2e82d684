//! Property-based tests for the cause algebra and effect evaluation.
//!
//! Uses proptest to generate random causes and effect chains and verify
//! the invariants hold for arbitrary shapes, not just the handful of
//! fixtures the unit tests use.

use proptest::prelude::*;

use ichor::{Cause, Effect, FiberId, Runtime};

/// Strategy for fiber ids with deterministic shrinking.
fn fiber_id() -> impl Strategy<Value = FiberId> {
    (1u64..1000).prop_map(|seq| FiberId { seq, started_at: 0 })
}

/// Strategy for arbitrary cause trees over string errors.
fn cause() -> impl Strategy<Value = Cause<String>> {
    let leaf = prop_oneof![
        Just(Cause::Empty),
        "[a-z]{1,8}".prop_map(Cause::fail),
        "[a-z]{1,8}".prop_map(Cause::die),
        fiber_id().prop_map(Cause::interrupt),
    ];
    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Cause::then(l, r)),
            (inner.clone(), inner).prop_map(|(l, r)| Cause::both(l, r)),
        ]
    })
}

proptest! {
    /// Empty is the identity for sequential composition.
    #[test]
    fn then_empty_identity(c in cause()) {
        prop_assert_eq!(&Cause::then(Cause::Empty, c.clone()), &c);
        prop_assert_eq!(&Cause::then(c.clone(), Cause::Empty), &c);
    }

    /// Empty is the identity for parallel composition.
    #[test]
    fn both_empty_identity(c in cause()) {
        prop_assert_eq!(&Cause::both(Cause::Empty, c.clone()), &c);
        prop_assert_eq!(&Cause::both(c.clone(), Cause::Empty), &c);
    }

    /// Composition never loses a contributing failure.
    #[test]
    fn composition_aggregates_predicates(l in cause(), r in cause()) {
        for combined in [Cause::then(l.clone(), r.clone()), Cause::both(l.clone(), r.clone())] {
            prop_assert_eq!(combined.failed(), l.failed() || r.failed());
            prop_assert_eq!(combined.died(), l.died() || r.died());
            prop_assert_eq!(combined.interrupted(), l.interrupted() || r.interrupted());
        }
    }

    /// Composition concatenates the failure lists in order.
    #[test]
    fn composition_preserves_failure_order(l in cause(), r in cause()) {
        let combined = Cause::then(l.clone(), r.clone());
        let mut expected: Vec<&String> = l.failures();
        expected.extend(r.failures());
        prop_assert_eq!(combined.failures(), expected);
    }

    /// `interrupted_only` agrees with the individual predicates.
    #[test]
    fn interrupted_only_consistency(c in cause()) {
        prop_assert_eq!(
            c.interrupted_only(),
            c.interrupted() && !c.failed() && !c.died()
        );
    }

    /// `map` relabels errors without changing the tree shape.
    #[test]
    fn map_preserves_shape(c in cause()) {
        let mapped = c.clone().map(|e| e.len());
        prop_assert_eq!(mapped.failed(), c.failed());
        prop_assert_eq!(mapped.died(), c.died());
        prop_assert_eq!(mapped.interruptors(), c.interruptors());
        prop_assert_eq!(mapped.failures().len(), c.failures().len());
    }

    /// An effect chain is a value: evaluating it twice produces the same
    /// result as folding the operations directly.
    #[test]
    fn evaluation_is_deterministic(values in prop::collection::vec(-1000i64..1000, 0..50)) {
        let mut program = Effect::<i64, String>::succeed(0);
        for v in values.clone() {
            program = program.map(move |acc| acc.wrapping_add(v));
        }
        let expected: i64 = values.iter().fold(0, |acc, v| acc.wrapping_add(*v));
        let rt = Runtime::new();
        prop_assert_eq!(rt.run_sync(&program), Ok(expected));
        prop_assert_eq!(rt.run_sync(&program), Ok(expected));
    }

    /// A typed failure short-circuits the rest of the chain.
    #[test]
    fn failure_short_circuits(prefix in 0usize..20, suffix in 0usize..20) {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let ran = Arc::new(AtomicUsize::new(0));
        let mut program = Effect::<u64, String>::succeed(0);
        for _ in 0..prefix {
            let ran = Arc::clone(&ran);
            program = program.flat_map(move |n| {
                ran.fetch_add(1, Ordering::SeqCst);
                Effect::succeed(n + 1)
            });
        }
        program = program.flat_map(|_| Effect::fail("stop".to_string()));
        for _ in 0..suffix {
            let ran = Arc::clone(&ran);
            program = program.flat_map(move |n| {
                ran.fetch_add(1, Ordering::SeqCst);
                Effect::succeed(n + 1)
            });
        }

        let result = Runtime::new().run_sync(&program);
        prop_assert!(result.is_err());
        prop_assert_eq!(ran.load(Ordering::SeqCst), prefix);
    }
}
