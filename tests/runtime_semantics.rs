//! End-to-end semantics tests driven through the public runtime API.
//!
//! These exercise the behaviors that only show up when effects are actually
//! interpreted: fork/join, structured completion, durable interruption,
//! finalizer ordering, async resumption, and fiber-ref inheritance.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded};

use ichor::{Effect, Exit, FiberRef, Runtime, Supervisor};

fn runtime() -> Runtime {
    Runtime::new()
}

#[test]
fn fork_join_propagates_result() {
    let program = Effect::<i32, String>::succeed(6)
        .map(|n| n * 7)
        .fork()
        .flat_map(|fiber| fiber.join());
    assert_eq!(runtime().run_sync(&program), Ok(42));
}

#[test]
fn fork_join_propagates_failure() {
    let program = Effect::<i32, String>::fail("child failed".into())
        .fork()
        .flat_map(|fiber| fiber.join());
    match runtime().run_sync_exit(&program) {
        Exit::Failure(cause) => {
            assert_eq!(cause.failures(), vec![&"child failed".to_string()]);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn parent_completion_drains_children() {
    // the child never resolves on its own; when the parent finishes, the
    // child must be interrupted and its finalizer run before the parent's
    // exit is published
    let cleaned = Arc::new(AtomicBool::new(false));
    let program = {
        let cleaned = Arc::clone(&cleaned);
        Effect::<i32, String>::never()
            .ensuring(Effect::total(move || {
                cleaned.store(true, Ordering::SeqCst);
            }))
            .fork()
            .flat_map(|_fiber| Effect::succeed(1))
    };
    assert_eq!(runtime().run_sync(&program), Ok(1));
    assert!(cleaned.load(Ordering::SeqCst));
}

#[test]
fn daemon_children_outlive_the_parent() {
    let (release_tx, release_rx) = bounded::<()>(1);
    let (done_tx, done_rx) = bounded::<()>(1);
    let program = {
        Effect::<(), String>::total(move || {
            release_rx.recv().ok();
            done_tx.send(()).ok();
        })
        .fork_daemon()
        .flat_map(|_fiber| Effect::succeed(7))
    };
    assert_eq!(runtime().run_sync(&program), Ok(7));
    // parent is done, daemon is still parked on the channel
    release_tx.send(()).unwrap();
    assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
}

#[test]
fn interruption_waits_for_uninterruptible_region() {
    let (started_tx, started_rx) = bounded::<()>(1);
    let (gate_tx, gate_rx) = bounded::<()>(1);
    let after = Arc::new(AtomicBool::new(false));

    let program = {
        let after = Arc::clone(&after);
        Effect::<(), String>::total(move || {
            started_tx.send(()).ok();
            gate_rx.recv().ok();
        })
        .uninterruptible()
        .flat_map(move |_| {
            let after = Arc::clone(&after);
            Effect::total(move || after.store(true, Ordering::SeqCst))
        })
    };

    let rt = runtime();
    let fiber = rt.run(&program);
    started_rx.recv().unwrap();

    // the fiber is blocked inside the region; the request must be deferred
    let canceling = {
        let rt = rt.clone();
        let fiber = fiber.clone();
        std::thread::spawn(move || rt.run_cancel(&fiber))
    };
    std::thread::sleep(Duration::from_millis(20));
    gate_tx.send(()).unwrap();

    let exit = canceling.join().unwrap();
    match exit {
        Exit::Failure(cause) => assert!(cause.interrupted_only()),
        other => panic!("expected interruption, got {other:?}"),
    }
    // the continuation past the region was discarded
    assert!(!after.load(Ordering::SeqCst));
}

#[test]
fn recovered_interruption_is_redelivered_at_the_next_interruptible_point() {
    let (entered_tx, entered_rx) = bounded::<()>(1);
    let caught = Arc::new(AtomicBool::new(false));

    // a fold inside the uninterruptible region recovers from the delivered
    // interruption; a later typed failure in the same region must still
    // reach its handler, and the durable request must resurface once the
    // region ends
    let program: Effect<i32, String> = {
        let caught = Arc::clone(&caught);
        Effect::<(), String>::total(move || {
            entered_tx.send(()).ok();
        })
        .zip_right(Effect::never())
        .interruptible()
        .fold_cause(|_| Effect::succeed(()), Effect::succeed)
        .zip_right(
            Effect::<i32, String>::fail("later".into()).catch_all(move |_| {
                let caught = Arc::clone(&caught);
                Effect::total(move || {
                    caught.store(true, Ordering::SeqCst);
                    42
                })
            }),
        )
        .uninterruptible()
    };

    let rt = runtime();
    let fiber = rt.run(&program);
    entered_rx.recv().unwrap();
    let exit = rt.run_cancel(&fiber);

    assert!(caught.load(Ordering::SeqCst));
    match exit {
        Exit::Failure(cause) => assert!(cause.interrupted_only()),
        other => panic!("expected interruption, got {other:?}"),
    }
}

#[test]
fn joining_in_fork_order_yields_results_in_fork_order() {
    // children complete in scrambled order; collecting through joins in
    // fork order must still produce fork-order results
    let count = 8;
    let forked = (0..count).fold(
        Effect::<Vec<ichor::Fiber<i32, String>>, String>::succeed(Vec::new()),
        |acc, i| {
            acc.flat_map(move |fibers| {
                Effect::<i32, String>::total(move || {
                    std::thread::sleep(Duration::from_millis(((count - i) * 3) as u64));
                    i
                })
                .fork()
                .map(move |fiber| {
                    let mut fibers = fibers.clone();
                    fibers.push(fiber);
                    fibers
                })
            })
        },
    );
    let program = forked.flat_map(|fibers| {
        fibers.into_iter().fold(
            Effect::<Vec<i32>, String>::succeed(Vec::new()),
            |acc, fiber| {
                acc.flat_map(move |results| {
                    fiber.join().map(move |value| {
                        let mut results = results.clone();
                        results.push(value);
                        results
                    })
                })
            },
        )
    });
    assert_eq!(
        runtime().run_sync(&program),
        Ok((0..count).collect::<Vec<_>>())
    );
}

#[test]
fn finalizers_run_innermost_first() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::<&'static str>::new()));
    let push = |label: &'static str| {
        let order = Arc::clone(&order);
        Effect::total(move || order.lock().push(label))
    };
    let program = Effect::<i32, String>::fail("boom".into())
        .ensuring(push("inner"))
        .ensuring(push("outer"));
    let exit = runtime().run_sync_exit(&program);
    assert!(matches!(exit, Exit::Failure(_)));
    assert_eq!(*order.lock(), vec!["inner", "outer"]);
}

#[test]
fn finalizers_run_on_interruption() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::<&'static str>::new()));
    let push = |label: &'static str| {
        let order = Arc::clone(&order);
        Effect::total(move || order.lock().push(label))
    };
    let program = Effect::<i32, String>::never()
        .ensuring(push("inner"))
        .ensuring(push("outer"));
    let rt = runtime();
    let fiber = rt.run(&program);
    let exit = rt.run_cancel(&fiber);
    match exit {
        Exit::Failure(cause) => assert!(cause.interrupted_only()),
        other => panic!("expected interruption, got {other:?}"),
    }
    assert_eq!(*order.lock(), vec!["inner", "outer"]);
}

#[test]
fn async_effect_resumes_from_another_thread() {
    let program = Effect::<i32, String>::async_effect(|callback| {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            callback.succeed(99);
        });
        None
    });
    assert_eq!(runtime().run_sync(&program), Ok(99));
}

#[test]
fn async_resume_is_at_most_once() {
    let program = Effect::<i32, String>::async_effect(|callback| {
        callback.succeed(1);
        callback.succeed(2);
        None
    });
    assert_eq!(runtime().run_sync(&program), Ok(1));
}

#[test]
fn async_canceler_runs_on_interruption() {
    let (canceled_tx, canceled_rx) = unbounded::<()>();
    let program = Effect::<i32, String>::async_effect(move |_callback| {
        let canceled_tx = canceled_tx.clone();
        Some(Box::new(move || {
            canceled_tx.send(()).ok();
        }))
    });
    let rt = runtime();
    let fiber = rt.run(&program);
    // let the fiber reach the suspension before interrupting
    let deadline = Instant::now() + Duration::from_secs(5);
    while fiber.status() != ichor::FiberStatus::Suspended && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    let exit = rt.run_cancel(&fiber);
    assert!(matches!(exit, Exit::Failure(_)));
    assert!(canceled_rx.recv_timeout(Duration::from_secs(5)).is_ok());
}

#[test]
fn fiber_ref_joins_child_value() {
    let program = FiberRef::make_with(0i64, |parent| *parent, |parent, child| parent + child)
        .widen::<String>()
        .flat_map(|counter| {
            let counter2 = counter.clone();
            counter
                .set(1)
                .widen::<String>()
                .zip_right(
                    counter2
                        .update(|n| n + 10)
                        .widen::<String>()
                        .fork()
                        .flat_map(|fiber| fiber.join()),
                )
                .zip_right(counter2.get().widen::<String>())
        });
    // child forks from 1, updates to 11; join merges 1 + 11
    assert_eq!(runtime().run_sync(&program), Ok(12));
}

#[test]
fn fiber_ref_locally_restores_on_failure() {
    let program = FiberRef::make(5u32).widen::<String>().flat_map(|r| {
        let r2 = r.clone();
        r.locally(9, Effect::<u32, String>::fail("inside".into()))
            .catch_all(move |_| r2.get().widen::<String>())
    });
    assert_eq!(runtime().run_sync(&program), Ok(5));
}

#[test]
fn supervisor_sees_fork_start_and_end() {
    let starts = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(AtomicUsize::new(0));
    let supervisor = {
        let starts = Arc::clone(&starts);
        let ends = Arc::clone(&ends);
        Supervisor::from_fn(
            move |_parent, _fiber| {
                starts.fetch_add(1, Ordering::SeqCst);
            },
            move |_fiber| {
                ends.fetch_add(1, Ordering::SeqCst);
            },
        )
    };
    let rt = Runtime::new().with_supervisor(supervisor);
    let program = Effect::<i32, String>::succeed(5)
        .fork()
        .flat_map(|fiber| fiber.join());
    assert_eq!(rt.run_sync(&program), Ok(5));

    // root + forked child
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    // end notifications can trail the exit observer by a beat
    let deadline = Instant::now() + Duration::from_secs(5);
    while ends.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(ends.load(Ordering::SeqCst), 2);
}

#[test]
fn check_interrupt_reports_region_status() {
    let program = Effect::<bool, String>::check_interrupt(Effect::succeed)
        .uninterruptible()
        .zip(Effect::<bool, String>::check_interrupt(Effect::succeed));
    assert_eq!(runtime().run_sync(&program), Ok((false, true)));
}

#[test]
fn descriptor_names_the_running_fiber() {
    let program = Effect::<i32, String>::descriptor_with(|descriptor| {
        assert!(descriptor.interruptible);
        Effect::succeed(descriptor.id.seq as i32)
    });
    let result = runtime().run_sync(&program).unwrap();
    assert!(result > 0);
}

#[test]
fn deep_flat_map_chain_does_not_overflow() {
    // far past any single turn's op budget
    let mut program = Effect::<u32, String>::succeed(0);
    for _ in 0..20_000 {
        program = program.map(|n| n + 1);
    }
    assert_eq!(runtime().run_sync(&program), Ok(20_000));
}

#[test]
fn yield_now_round_trips_through_the_executor() {
    let program = Effect::yield_now()
        .widen::<String>()
        .zip_right(Effect::<i32, String>::succeed(3));
    assert_eq!(runtime().run_sync(&program), Ok(3));
}
