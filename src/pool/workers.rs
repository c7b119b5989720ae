//! Fixed-size worker pool draining a shared FIFO task queue under a single mutex + condition
//! variable.
//!
//! Grounded on the source's `ThreadPool` (`examples/original_source/threadpool.h`): one mutex
//! guards both the task queue and the closed flag together, so a worker's "queue empty and not
//! closed, go to sleep" check and a `shutdown` call's "set closed, wake everyone" update can never
//! interleave. Splitting `closed` into its own mutex (as an earlier version of this pool did) lets
//! a worker observe `closed == false` and then block on the condvar *after* `shutdown` has already
//! notified, losing the wakeup and hanging the pool forever.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::task::Task;

struct State {
    queue: VecDeque<Task>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    not_empty: Condvar,
}

/// A fixed set of worker threads executing [`Task`]s dispatched by the reactor.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `thread_count` workers, each running `handler(task)` for every task it dequeues.
    pub fn new<F>(thread_count: usize, handler: F) -> Self
    where
        F: Fn(Task) + Send + Sync + 'static,
    {
        assert!(thread_count > 0, "worker pool needs at least one thread");

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
        });
        let handler = Arc::new(handler);

        let handles = (0..thread_count)
            .map(|i| {
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || Self::run(shared, handler))
                    .expect("spawn worker thread")
            })
            .collect();

        Self { shared, handles }
    }

    fn run(shared: Arc<Shared>, handler: Arc<dyn Fn(Task) + Send + Sync>) {
        loop {
            let task = {
                let mut state = shared.state.lock().unwrap();
                loop {
                    if let Some(task) = state.queue.pop_front() {
                        break Some(task);
                    }
                    if state.closed {
                        break None;
                    }
                    state = shared.not_empty.wait(state).unwrap();
                }
            };

            match task {
                Some(task) => handler(task),
                None => return,
            }
        }
    }

    /// Enqueues `task`, waking exactly one idle worker.
    pub fn submit(&self, task: Task) {
        self.shared.state.lock().unwrap().queue.push_back(task);
        self.shared.not_empty.notify_one();
    }

    /// Signals every worker to exit once its current task (if any) and the remaining queue drain,
    /// then joins all worker threads. Blocks until every in-flight and queued task has run.
    pub fn shutdown(mut self) {
        self.shared.state.lock().unwrap().closed = true;
        self.shared.not_empty.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!("worker pool drained and joined");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn tasks_run_exactly_once_in_fifo_order_per_submitter() {
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::new(1, move |task| tx.send(task).unwrap());

        for id in 0..10 {
            pool.submit(Task::OnRead(id));
        }
        pool.shutdown();

        let received: Vec<_> = rx.try_iter().collect();
        let expected: Vec<_> = (0..10).map(Task::OnRead).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn shutdown_completes_even_with_queued_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        let pool = WorkerPool::new(4, move |_| {
            counter2.fetch_add(1, Ordering::SeqCst);
        });

        for id in 0..200 {
            pool.submit(Task::OnWrite(id));
        }
        pool.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn workers_execute_concurrently() {
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::new(4, move |task| {
            thread::sleep(Duration::from_millis(20));
            tx.send(task).unwrap();
        });
        let start = std::time::Instant::now();
        for id in 0..8 {
            pool.submit(Task::OnRead(id));
        }
        pool.shutdown();
        assert_eq!(rx.try_iter().count(), 8);
        // 8 tasks * 20ms serialized would be >= 160ms; with 4 workers it should be well under.
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    /// Regression test for a lost-wakeup deadlock: closing while every worker is mid-check of the
    /// predicate (queue empty, not yet closed) must not let a worker miss the `notify_all` and
    /// block forever, since `closed` now lives behind the same mutex the condvar is paired with.
    #[test]
    fn shutdown_completes_when_racing_idle_workers() {
        for _ in 0..50 {
            let pool = WorkerPool::new(4, |_| {});
            pool.shutdown();
        }
    }
}
