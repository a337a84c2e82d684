//! Work-Stealing Turn Executor
//!
//! The host scheduler the interpreter runs on: N worker threads, each with
//! a local deque, stealing from a global injection queue and from each
//! other for load balancing.
//!
//! Tasks are opaque closures; the interpreter submits one task per fiber
//! turn, so at most one turn of a given fiber is ever queued at a time.
//!
//! ## Technical References
//!
//! - [Chase-Lev Deque](https://doi.org/10.1145/1073970.1073974)
//! - [crossbeam-deque](https://docs.rs/crossbeam-deque)

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_deque::{Injector, Stealer, Worker as Deque};
use parking_lot::Mutex;

use crate::config;
use crate::log;

type Task = Box<dyn FnOnce() + Send>;

/// Work-stealing executor for fiber turns.
pub struct Executor {
    /// Global injection queue.
    injector: Arc<Injector<Task>>,
    /// Shutdown flag.
    shutdown: Arc<AtomicBool>,
    /// Number of workers currently in their run loop.
    active_workers: Arc<AtomicUsize>,
    /// Worker thread handles.
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    /// Create an executor with `num_workers` worker threads, started
    /// immediately.
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let active_workers = Arc::new(AtomicUsize::new(0));

        let mut deques = Vec::with_capacity(num_workers);
        let mut stealers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let deque = Deque::new_fifo();
            stealers.push(deque.stealer());
            deques.push(deque);
        }
        let stealers = Arc::new(stealers);

        let mut threads = Vec::with_capacity(num_workers);
        for (id, deque) in deques.into_iter().enumerate() {
            let worker = WorkerLoop {
                id,
                injector: Arc::clone(&injector),
                stealers: Arc::clone(&stealers),
                shutdown: Arc::clone(&shutdown),
                active_workers: Arc::clone(&active_workers),
            };
            let handle = thread::Builder::new()
                .name(format!("ichor-worker-{id}"))
                .spawn(move || worker.run(deque))
                .expect("failed to spawn executor worker thread");
            threads.push(handle);
        }

        log::debug(format!("executor started with {num_workers} workers"));

        Self {
            injector,
            shutdown,
            active_workers,
            threads: Mutex::new(threads),
        }
    }

    /// The process-wide executor, sized from the runtime configuration.
    pub fn global() -> &'static Executor {
        static GLOBAL: OnceLock<Executor> = OnceLock::new();
        GLOBAL.get_or_init(|| Executor::new(config::global().executor_workers))
    }

    /// Submit a task for execution.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.injector.push(Box::new(task));
    }

    /// Number of workers currently in their run loop.
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    /// Request shutdown and join the worker threads. Queued tasks that
    /// have not started are dropped.
    pub fn shutdown_and_wait(&self) {
        self.shutdown.store(true, Ordering::Release);
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
    }
}

/// A worker thread in the executor.
struct WorkerLoop {
    /// Worker ID (reserved for debugging).
    #[allow(dead_code)]
    id: usize,
    injector: Arc<Injector<Task>>,
    stealers: Arc<Vec<Stealer<Task>>>,
    shutdown: Arc<AtomicBool>,
    active_workers: Arc<AtomicUsize>,
}

impl WorkerLoop {
    fn run(self, local: Deque<Task>) {
        self.active_workers.fetch_add(1, Ordering::AcqRel);

        let mut misses = 0u32;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            if let Some(task) = self.find_work(&local) {
                misses = 0;
                task();
            } else {
                misses += 1;
                if misses < 64 {
                    thread::yield_now();
                } else {
                    // idle: poll at a coarse interval instead of spinning
                    thread::park_timeout(Duration::from_millis(1));
                }
            }
        }

        self.active_workers.fetch_sub(1, Ordering::AcqRel);
    }

    fn find_work(&self, local: &Deque<Task>) -> Option<Task> {
        // 1. Local queue first
        if let Some(task) = local.pop() {
            return Some(task);
        }

        // 2. Global queue
        loop {
            match self.injector.steal_batch_and_pop(local) {
                crossbeam_deque::Steal::Success(task) => return Some(task),
                crossbeam_deque::Steal::Empty => break,
                crossbeam_deque::Steal::Retry => continue,
            }
        }

        // 3. Steal from other workers
        for stealer in self.stealers.iter() {
            loop {
                match stealer.steal() {
                    crossbeam_deque::Steal::Success(task) => return Some(task),
                    crossbeam_deque::Steal::Empty => break,
                    crossbeam_deque::Steal::Retry => continue,
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_submitted_tasks_run() {
        let executor = Executor::new(2);
        let (tx, rx) = bounded(1);
        executor.submit(move || {
            tx.send(42).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        executor.shutdown_and_wait();
    }

    #[test]
    fn test_many_tasks_across_workers() {
        let executor = Executor::new(4);
        let count = Arc::new(AtomicU32::new(0));
        let (tx, rx) = bounded(1);
        let total = 1000;
        for _ in 0..total {
            let count = Arc::clone(&count);
            let tx = tx.clone();
            executor.submit(move || {
                if count.fetch_add(1, Ordering::SeqCst) + 1 == total {
                    let _ = tx.send(());
                }
            });
        }
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), total);
        executor.shutdown_and_wait();
    }

    #[test]
    fn test_shutdown_stops_workers() {
        let executor = Executor::new(2);
        executor.shutdown_and_wait();
        assert_eq!(executor.active_workers(), 0);
    }
}
