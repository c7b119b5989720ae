//! Error kinds raised by the reactor and its collaborators.
//!
//! Syscall-level errors are converted to one of these variants at the boundary where they are
//! observed. The reactor itself never propagates an error out of the event loop: it recovers
//! locally, closes the offending connection, or terminates at startup.

use std::io;

/// Errors that can terminate the server at startup, or escape a collaborator's constructor.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configured port, pool size, or thread count failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Binding or configuring the listening socket failed.
    #[error("socket setup failed: {0}")]
    SocketSetup(#[source] io::Error),

    /// The readiness multiplexer could not be created or armed.
    #[error("epoll setup failed: {0}")]
    Poller(#[source] io::Error),

    /// The database connection pool could not open any handle.
    #[error("database pool exhausted at startup")]
    PoolUnavailable,
}

/// Errors raised while acquiring a handle from the database connection pool.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    /// No idle handle was available and the caller asked not to block.
    #[error("connection pool busy")]
    Busy,

    /// `acquire`/`try_acquire` was called after `close()` drained the pool.
    #[error("connection pool is closed")]
    Closed,
}
