//! Bounded resource pools: worker threads (§4.D) and database handles (§4.E).

pub mod db;
pub mod workers;

pub use db::{DbPool, PooledConn};
pub use workers::WorkerPool;
