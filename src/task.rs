//! The unit of work handed from the reactor to a worker thread.
//!
//! A tagged variant over a connection id, rather than a boxed closure capturing the connection
//! directly: the reactor, not the task, owns the connection table, so a worker recovers the
//! connection by looking up the id at task entry. This sidesteps the cyclic-ownership problem a
//! captured `Arc<Connection>` would create between the timer heap's close callback and the
//! connection table.

/// Connection-table key. Assigned by a `slab::Slab` in the reactor.
pub type ConnId = usize;

/// A one-shot unit of worker-pool work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Drive the read -> parse -> (maybe respond) path for a connection.
    OnRead(ConnId),
    /// Drive the write path for a connection with a pending response.
    OnWrite(ConnId),
}
