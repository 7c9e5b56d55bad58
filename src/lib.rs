//! A resilient database connection pool.
//!
//! Opening a new database connection every time one is needed is both
//! inefficient and, under load, can exhaust whatever the driver and
//! backend can sustain. This crate sits between application code and a
//! low-level database driver and provides two tightly coupled pieces:
//!
//! - [`steady`], a transparent wrapper around one driver connection that
//!   reopens itself on a failover-class error and enforces an optional
//!   per-connection usage cap.
//! - [`pool`], which multiplexes many such connections across concurrent
//!   users through two leasing disciplines: *dedicated* (one user at a
//!   time) and *shared* (multiple users, when the driver allows it).
//!
//! This crate is driver-agnostic: implement [`driver::Driver`] and
//! [`driver::RawConnection`]/[`driver::RawCursor`] over whatever low-level
//! client the backend uses.
#![deny(missing_docs, missing_debug_implementations)]

pub mod driver;
mod error;
pub mod ping;
pub mod pool;
pub mod steady;
#[cfg(test)]
mod test_support;

pub use driver::{Driver, DriverError, RawConnection, RawCursor, ThreadSafety};
pub use error::PoolError;
pub use ping::PingMask;
pub use pool::{Builder, DedicatedLease, Lease, Pool, PoolState, SharedLease};
pub use steady::{FailoverOverride, SteadyConfig, SteadyConnection, SteadyCursor};
