//! Bounded pool of pre-opened MySQL connections, guarded by a counting semaphore plus a mutex
//! around the idle queue, mirroring the source's `sem_wait`/idle-queue pair in `SqlConnPool`.
//!
//! Two acquisition disciplines are exposed rather than one, resolving the ordering-inversion
//! ambiguity the source leaves open (`GetConn` checks the queue empty *then* waits on the
//! semaphore, which can double-count a busy pool as both "empty" and "exhausted"):
//!
//! - [`DbPool::acquire`] is strictly semaphore-gated and blocks the calling thread.
//! - [`DbPool::try_acquire`] never blocks; it's what request handlers should call, since parking a
//!   worker thread on a saturated database would stall the queue behind it.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder};
use tracing::{error, info, warn};

use crate::error::PoolError;

/// A counting semaphore used purely for admission control; the idle queue itself is guarded
/// separately by its own mutex, matching the source's split between `semId_` and `mtx_`.
#[derive(Debug)]
struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn new(n: usize) -> Self {
        Self {
            permits: Mutex::new(n),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.available.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock().unwrap();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    fn release(&self) {
        *self.permits.lock().unwrap() += 1;
        self.available.notify_one();
    }
}

#[derive(Debug)]
struct Inner {
    idle: Mutex<VecDeque<Conn>>,
    sem: Semaphore,
    closed: Mutex<bool>,
}

/// A bounded, sharable pool of MySQL connections. Cheap to clone (wraps an `Arc`).
#[derive(Clone, Debug)]
pub struct DbPool(Arc<Inner>);

impl DbPool {
    /// Opens up to `size` connections to `host:port/db`. A handle that fails to connect is
    /// logged and excluded from the pool's capacity rather than failing the whole call, per the
    /// "degraded capacity" disposition in the error-handling table.
    pub fn init(
        host: &str,
        port: u16,
        user: &str,
        pwd: &str,
        db: &str,
        size: usize,
    ) -> Self {
        assert!(size > 0, "db pool size must be positive");

        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(pwd))
            .db_name(Some(db))
            .into();

        let mut idle = VecDeque::with_capacity(size);
        for _ in 0..size {
            match Conn::new(opts.clone()) {
                Ok(mut conn) => {
                    if let Err(e) = ensure_users_table(&mut conn) {
                        warn!(error = %e, "failed to ensure users table on a pooled connection");
                    }
                    idle.push_back(conn);
                }
                Err(e) => error!(error = %e, "mysql connect failed; pool capacity degraded"),
            }
        }

        let opened = idle.len();
        if opened == 0 {
            error!("database pool opened zero connections");
        } else {
            info!(opened, requested = size, "database pool initialized");
        }

        Self(Arc::new(Inner {
            idle: Mutex::new(idle),
            sem: Semaphore::new(opened),
            closed: Mutex::new(false),
        }))
    }

    /// Blocks until a handle is available, then removes it from the idle queue.
    pub fn acquire(&self) -> Result<PooledConn, PoolError> {
        if *self.0.closed.lock().unwrap() {
            return Err(PoolError::Closed);
        }
        self.0.sem.acquire();
        let conn = self
            .0
            .idle
            .lock()
            .unwrap()
            .pop_front()
            .expect("semaphore permit implies a queued handle");
        Ok(PooledConn {
            conn: Some(conn),
            pool: self.clone(),
        })
    }

    /// Non-blocking variant for request handlers: returns `PoolError::Busy` instead of parking
    /// the calling (worker) thread when the pool is saturated.
    pub fn try_acquire(&self) -> Result<PooledConn, PoolError> {
        if *self.0.closed.lock().unwrap() {
            return Err(PoolError::Closed);
        }
        if !self.0.sem.try_acquire() {
            return Err(PoolError::Busy);
        }
        let conn = self
            .0
            .idle
            .lock()
            .unwrap()
            .pop_front()
            .expect("semaphore permit implies a queued handle");
        Ok(PooledConn {
            conn: Some(conn),
            pool: self.clone(),
        })
    }

    fn release(&self, conn: Conn) {
        self.0.idle.lock().unwrap().push_back(conn);
        self.0.sem.release();
    }

    /// Drains and drops every idle handle and marks the pool closed; in-flight `PooledConn`s
    /// still release normally, they just won't be handed out again.
    pub fn close(&self) {
        *self.0.closed.lock().unwrap() = true;
        self.0.idle.lock().unwrap().clear();
        info!("database pool closed");
    }

}

fn ensure_users_table(conn: &mut Conn) -> mysql::Result<()> {
    conn.query_drop(
        "CREATE TABLE IF NOT EXISTS users ( \
            id INT AUTO_INCREMENT PRIMARY KEY, \
            username VARCHAR(64) NOT NULL UNIQUE, \
            password VARCHAR(255) NOT NULL \
        )",
    )
}

/// An acquired handle; returns to the pool's idle queue when dropped.
#[derive(Debug)]
pub struct PooledConn {
    conn: Option<Conn>,
    pool: DbPool,
}

impl Deref for PooledConn {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        self.conn.as_ref().expect("conn taken before drop")
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().expect("conn taken before drop")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
