//! The state a [`Pool`](super::Pool)'s monitor guards: the idle cache, the
//! shared cache, and the admission counter.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::driver::Driver;
use crate::steady::SteadyConnection;

/// A steady connection currently on loan to one or more shared users.
///
/// Wrapped in `Arc<Mutex<_>>` rather than bare ownership: the source relies
/// on the driver's own thread-safety guarantee (`threadsafety >= 2`) to let
/// several callers touch one connection unsynchronized, but Rust's aliasing
/// rules require *some* synchronization primitive regardless of what the
/// driver itself promises, so every shared lease serializes through this
/// mutex instead of racing on the raw handle.
///
/// `shares` and `in_transaction` are tracked here, not read off the
/// connection: sorting and admission run under the pool's monitor, and
/// locking a connection's own mutex to ask it is both a stall (a caller
/// legitimately holding that connection across a query blocks every other
/// pool operation) and a self-deadlock (a caller re-entering the pool while
/// already holding the connection's lock). Both fields are updated by the
/// pool itself, under the same monitor lock admission already holds.
pub(crate) struct SharedRecord<D: Driver> {
    pub(crate) conn: Arc<Mutex<SteadyConnection<D>>>,
    pub(crate) shares: u32,
    pub(crate) in_transaction: bool,
}

impl<D: Driver> SharedRecord<D> {
    /// `(in_transaction, shares)` ordering key. Non-transacting records
    /// sort first, then by ascending share count.
    fn sort_key(&self) -> (bool, u32) {
        (self.in_transaction, self.shares)
    }
}

impl<D: Driver> PartialEq for SharedRecord<D> {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl<D: Driver> Eq for SharedRecord<D> {}

impl<D: Driver> PartialOrd for SharedRecord<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: Driver> Ord for SharedRecord<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Everything the pool's monitor (mutex + condvar) protects together.
pub(crate) struct PoolInternals<D: Driver> {
    pub(crate) idle: VecDeque<SteadyConnection<D>>,
    pub(crate) shared: Vec<SharedRecord<D>>,
    pub(crate) connections: usize,
    /// Shared slots reserved by a caller that has released the monitor to
    /// open a fresh connection, counted against `max_shared` so a second
    /// caller can't also see room for a new record in the meantime.
    pub(crate) pending_shared: usize,
    pub(crate) closed: bool,
}

impl<D: Driver> PoolInternals<D> {
    pub(crate) fn new() -> Self {
        PoolInternals {
            idle: VecDeque::new(),
            shared: Vec::new(),
            connections: 0,
            pending_shared: 0,
            closed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ThreadSafety;
    use crate::steady::SteadyConfig;
    use crate::test_support::MockDriver;

    fn record(shares: u32, in_transaction: bool) -> SharedRecord<MockDriver> {
        let driver = Arc::new(MockDriver::new(ThreadSafety::Connection));
        let conn = SteadyConnection::connect(driver, SteadyConfig::default()).unwrap();
        SharedRecord {
            conn: Arc::new(Mutex::new(conn)),
            shares,
            in_transaction,
        }
    }

    #[test]
    fn new_internals_start_empty() {
        let internals: PoolInternals<MockDriver> = PoolInternals::new();
        assert!(internals.idle.is_empty());
        assert!(internals.shared.is_empty());
        assert_eq!(internals.connections, 0);
        assert_eq!(internals.pending_shared, 0);
        assert!(!internals.closed);
    }

    #[test]
    fn non_transacting_records_sort_before_transacting_ones() {
        let idle = record(5, false);
        let busy = record(1, true);
        assert!(idle < busy);
    }

    #[test]
    fn among_non_transacting_records_fewer_shares_sorts_first() {
        let fewer = record(1, false);
        let more = record(3, false);
        assert!(fewer < more);
    }
}
