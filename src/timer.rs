//! Min-heap of per-connection idle-eviction deadlines.
//!
//! Mirrors the source's heap timer (`add`/`adjust`/`tick`/`GetNextTick`) but keeps a secondary
//! `id -> heap index` map so `adjust` and `cancel` are `O(log N)` instead of a linear scan, the
//! way a textbook indexed binary heap does.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Identifies a connection inside the timer heap. Same type as the connection-table key.
pub type ConnId = usize;

struct Entry {
    id: ConnId,
    deadline: Instant,
    seq: u64,
    on_expire: Box<dyn FnOnce(ConnId) + Send>,
}

/// A min-heap of connection deadlines, ordered by `deadline` ascending with insertion order as a
/// tiebreak (an implementation detail, not something callers should rely on).
pub struct TimerHeap {
    heap: Vec<Entry>,
    index: HashMap<ConnId, usize>,
    next_seq: u64,
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHeap {
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Inserts a new deadline for `id`, replacing any existing one.
    pub fn add<F>(&mut self, id: ConnId, timeout: Duration, on_expire: F)
    where
        F: FnOnce(ConnId) + Send + 'static,
    {
        self.cancel(id);
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = Entry {
            id,
            deadline: Instant::now() + timeout,
            seq,
            on_expire: Box::new(on_expire),
        };
        let at = self.heap.len();
        self.heap.push(entry);
        self.index.insert(id, at);
        self.sift_up(at);
    }

    /// Moves `id`'s deadline to `now + timeout`. No-op if `id` has no live entry.
    pub fn adjust(&mut self, id: ConnId, timeout: Duration) {
        if let Some(&at) = self.index.get(&id) {
            self.heap[at].deadline = Instant::now() + timeout;
            let at = self.sift_up(at);
            self.sift_down(at);
        }
    }

    /// Removes `id`'s live entry, if any, without running its callback.
    pub fn cancel(&mut self, id: ConnId) -> bool {
        let Some(at) = self.index.remove(&id) else {
            return false;
        };
        self.remove_at(at);
        true
    }

    /// Runs every callback whose deadline has passed, exactly once each, in deadline order.
    pub fn tick(&mut self) {
        let now = Instant::now();
        while let Some(top) = self.heap.first() {
            if top.deadline > now {
                break;
            }
            self.pop_and_run();
        }
    }

    /// Runs `tick()`, then reports how long to wait before the next deadline: `None` means "no
    /// pending timers, wait indefinitely."
    pub fn next_tick(&mut self) -> Option<Duration> {
        self.tick();
        self.heap
            .first()
            .map(|e| e.deadline.saturating_duration_since(Instant::now()))
    }

    fn pop_and_run(&mut self) {
        let entry = self.remove_at(0);
        self.index.remove(&entry.id);
        (entry.on_expire)(entry.id);
    }

    /// Removes the entry at heap index `at`, restoring heap order, and returns it.
    fn remove_at(&mut self, at: usize) -> Entry {
        let last = self.heap.len() - 1;
        self.heap.swap(at, last);
        let removed = self.heap.pop().expect("non-empty heap");
        if at < self.heap.len() {
            self.index.insert(self.heap[at].id, at);
            let at = self.sift_up(at);
            self.sift_down(at);
        }
        removed
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let lhs = &self.heap[a];
        let rhs = &self.heap[b];
        (lhs.deadline, lhs.seq) < (rhs.deadline, rhs.seq)
    }

    fn sift_up(&mut self, mut at: usize) -> usize {
        while at > 0 {
            let parent = (at - 1) / 2;
            if self.less(at, parent) {
                self.swap(at, parent);
                at = parent;
            } else {
                break;
            }
        }
        at
    }

    fn sift_down(&mut self, mut at: usize) -> usize {
        loop {
            let left = 2 * at + 1;
            let right = 2 * at + 2;
            let mut smallest = at;
            if left < self.heap.len() && self.less(left, smallest) {
                smallest = left;
            }
            if right < self.heap.len() && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == at {
                return at;
            }
            self.swap(at, smallest);
            at = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].id, a);
        self.index.insert(self.heap[b].id, b);
    }
}
