//! The admission-control layer that multiplexes [`SteadyConnection`]s
//! across concurrent users via dedicated and shared leases.

mod builder;
pub(crate) mod internals;
mod lease;

pub use builder::Builder;
pub use lease::{DedicatedLease, SharedLease};

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::{trace, warn};

use crate::driver::{Driver, DriverError};
use crate::error::PoolError;
use crate::ping::PingMask;
use crate::pool::internals::{PoolInternals, SharedRecord};
use crate::steady::{SteadyConfig, SteadyConnection};

/// A snapshot of a [`Pool`]'s admission state, for introspection/metrics.
pub struct PoolState {
    /// Connections currently outside the idle cache (dedicated loans plus
    /// shared records).
    pub connections: usize,
    /// Connections sitting in the idle cache, unused.
    pub idle: usize,
    /// Distinct shared records currently loaned out.
    pub shared: usize,
}

impl fmt::Debug for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolState")
            .field("connections", &self.connections)
            .field("idle", &self.idle)
            .field("shared", &self.shared)
            .finish()
    }
}

/// The guts of a [`Pool`], held behind an `Arc` so leases can hand back a
/// cheap handle without borrowing the pool itself.
pub(crate) struct PoolShared<D: Driver> {
    pub(crate) driver: Arc<D>,
    pub(crate) min_cached: usize,
    pub(crate) max_cached: usize,
    pub(crate) max_shared: usize,
    pub(crate) max_connections: usize,
    pub(crate) blocking: bool,
    pub(crate) reset: bool,
    pub(crate) steady_config: SteadyConfig<D>,
    pub(crate) internals: Mutex<PoolInternals<D>>,
    pub(crate) condvar: Condvar,
}

impl<D: Driver> PoolShared<D> {
    /// Block until notified, or fail synchronously with
    /// [`PoolError::TooManyConnections`] when the pool is configured not to
    /// block.
    fn wait_or_fail<'a>(
        &self,
        guard: MutexGuard<'a, PoolInternals<D>>,
    ) -> Result<MutexGuard<'a, PoolInternals<D>>, PoolError<DriverError<D>>> {
        if !self.blocking {
            return Err(PoolError::TooManyConnections);
        }
        Ok(self
            .condvar
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn open_steady(&self) -> Result<SteadyConnection<D>, DriverError<D>> {
        SteadyConnection::connect(Arc::clone(&self.driver), self.steady_config.clone())
    }

    /// Acquire a dedicated (single-user) lease.
    pub(crate) fn acquire_dedicated(
        &self,
    ) -> Result<SteadyConnection<D>, PoolError<DriverError<D>>> {
        let mut internals = self.internals.lock().unwrap();
        while self.max_connections > 0 && internals.connections >= self.max_connections {
            internals = self.wait_or_fail(internals)?;
        }

        if let Some(mut conn) = internals.idle.pop_front() {
            let _ = conn.ping_check(PingMask::ON_CHECKOUT, true);
            internals.connections += 1;
            trace!("dedicated connection acquired, {} in flight", internals.connections);
            return Ok(conn);
        }

        // Reserve the slot before releasing the monitor: otherwise two
        // callers can both pass the admission check above while idle is
        // empty, both open a connection, and both land here, pushing
        // `connections` past `max_connections`.
        internals.connections += 1;
        drop(internals);
        match self.open_steady() {
            Ok(conn) => {
                trace!("dedicated connection acquired");
                Ok(conn)
            }
            Err(err) => {
                let mut internals = self.internals.lock().unwrap();
                internals.connections -= 1;
                self.condvar.notify_one();
                Err(PoolError::Driver(err))
            }
        }
    }

    /// Acquire a shared lease, reusing the least-shared non-transacting
    /// record or creating a new one.
    pub(crate) fn acquire_shared(
        &self,
    ) -> Result<Arc<Mutex<SteadyConnection<D>>>, PoolError<DriverError<D>>> {
        let mut internals = self.internals.lock().unwrap();
        // The whole decision is re-examined from scratch on every lap: a
        // waiter parked on "every record is mid-transaction" may wake up to
        // find the record it was eyeing has since been fully unshared and
        // moved to idle (share count hit zero while it slept), in which
        // case there's room to open a fresh record instead of indexing into
        // a shared cache that's shrunk out from under it.
        loop {
            while internals.shared.is_empty()
                && self.max_connections > 0
                && internals.connections >= self.max_connections
            {
                internals = self.wait_or_fail(internals)?;
            }

            if internals.shared.len() + internals.pending_shared < self.max_shared {
                if let Some(mut conn) = internals.idle.pop_front() {
                    let _ = conn.ping_check(PingMask::ON_CHECKOUT, true);
                    let conn = Arc::new(Mutex::new(conn));
                    internals.shared.push(SharedRecord {
                        conn: Arc::clone(&conn),
                        shares: 1,
                        in_transaction: false,
                    });
                    internals.connections += 1;
                    self.condvar.notify_one();
                    trace!(
                        "shared connection acquired, {} in flight",
                        internals.connections
                    );
                    return Ok(conn);
                }

                // Reserve both the admission slot and the shared-cache slot
                // before releasing the monitor: otherwise two callers can
                // both see room for a new record, both open a connection,
                // and both push one, pushing `shared.len()` and
                // `connections` past their caps.
                internals.connections += 1;
                internals.pending_shared += 1;
                drop(internals);
                let opened = self.open_steady();
                internals = self.internals.lock().unwrap();
                internals.pending_shared -= 1;
                match opened {
                    Ok(conn) => {
                        let conn = Arc::new(Mutex::new(conn));
                        internals.shared.push(SharedRecord {
                            conn: Arc::clone(&conn),
                            shares: 1,
                            in_transaction: false,
                        });
                        self.condvar.notify_one();
                        trace!(
                            "shared connection acquired, {} in flight",
                            internals.connections
                        );
                        return Ok(conn);
                    }
                    Err(err) => {
                        internals.connections -= 1;
                        self.condvar.notify_one();
                        return Err(PoolError::Driver(err));
                    }
                }
            }

            internals.shared.sort();
            let mut candidate = internals.shared.remove(0);
            if candidate.in_transaction {
                // Every record currently checked is mid-transaction: put
                // this one back at the head and wait for a commit/return
                // to wake us.
                internals.shared.insert(0, candidate);
                internals = self.wait_or_fail(internals)?;
                continue;
            }

            candidate.shares += 1;
            let conn = Arc::clone(&candidate.conn);
            {
                let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let _ = guard.ping_check(PingMask::ON_CHECKOUT, true);
            }
            internals.shared.push(candidate);
            self.condvar.notify_one();
            trace!(
                "shared connection acquired, {} in flight",
                internals.connections
            );
            return Ok(conn);
        }
    }

    /// Update a shared record's transaction flag, under the monitor, so
    /// admission ordering never has to lock the connection itself to ask.
    pub(crate) fn set_shared_transaction(
        &self,
        conn: &Arc<Mutex<SteadyConnection<D>>>,
        in_transaction: bool,
    ) {
        let mut internals = self.internals.lock().unwrap();
        if let Some(record) = internals
            .shared
            .iter_mut()
            .find(|record| Arc::ptr_eq(&record.conn, conn))
        {
            record.in_transaction = in_transaction;
        }
        if !in_transaction {
            self.condvar.notify_one();
        }
    }

    /// Return a connection to the idle cache, or close it outright if the
    /// cache is already full.
    pub(crate) fn cache(&self, mut conn: SteadyConnection<D>) {
        let mut internals = self.internals.lock().unwrap();
        conn.reset(self.reset);
        if self.max_cached == 0 || internals.idle.len() < self.max_cached {
            internals.idle.push_back(conn);
        } else {
            conn.close();
        }
        internals.connections -= 1;
        self.condvar.notify_one();
    }

    /// Decrement a shared record's share count; once it reaches zero,
    /// remove the record and return its connection to the idle cache.
    pub(crate) fn unshare(&self, conn: Arc<Mutex<SteadyConnection<D>>>) {
        let mut internals = self.internals.lock().unwrap();
        let position = internals
            .shared
            .iter()
            .position(|record| Arc::ptr_eq(&record.conn, &conn));
        let emptied = if let Some(index) = position {
            internals.shared[index].shares -= 1;
            let shares = internals.shared[index].shares;
            if shares == 0 {
                internals.shared.remove(index);
            }
            shares == 0
        } else {
            // The pool may be closing concurrently; tolerate absence.
            false
        };
        drop(internals);

        if emptied {
            match Arc::try_unwrap(conn) {
                Ok(mutex) => {
                    let conn = mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
                    self.cache(conn);
                }
                Err(_) => {
                    warn!("shared record reached zero shares but is still referenced elsewhere");
                }
            }
        }
    }

    /// Close every idle and shared connection, best-effort, and wake every
    /// waiter.
    pub(crate) fn close(&self) {
        let mut internals = self.internals.lock().unwrap();
        if internals.closed {
            return;
        }
        while let Some(mut conn) = internals.idle.pop_front() {
            conn.close();
        }
        for record in internals.shared.drain(..) {
            if let Ok(mutex) = Arc::try_unwrap(record.conn) {
                let mut conn = mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
                conn.close();
            }
            internals.connections = internals.connections.saturating_sub(1);
        }
        internals.closed = true;
        self.condvar.notify_all();
    }

    pub(crate) fn state(&self) -> PoolState {
        let internals = self.internals.lock().unwrap();
        PoolState {
            connections: internals.connections,
            idle: internals.idle.len(),
            shared: internals.shared.len(),
        }
    }
}

/// A resilient connection pool multiplexing [`SteadyConnection`]s across
/// concurrent users via dedicated and shared leases.
///
/// Cloning a `Pool` is cheap (an `Arc` bump) and every clone shares the
/// same admission state.
pub struct Pool<D: Driver> {
    pub(crate) inner: Arc<PoolShared<D>>,
}

impl<D: Driver> Pool<D> {
    /// A [`Builder`] with sensible defaults.
    pub fn builder() -> Builder<D> {
        Builder::new()
    }

    /// Acquire a connection, shared if `shareable` and the pool allows
    /// sharing, dedicated otherwise.
    pub fn connection(
        &self,
        shareable: bool,
    ) -> Result<Lease<D>, PoolError<DriverError<D>>> {
        if shareable && self.inner.max_shared > 0 {
            let conn = self.inner.acquire_shared()?;
            Ok(Lease::Shared(SharedLease::new(Arc::clone(&self.inner), conn)))
        } else {
            let conn = self.inner.acquire_dedicated()?;
            Ok(Lease::Dedicated(DedicatedLease::new(
                Arc::clone(&self.inner),
                conn,
            )))
        }
    }

    /// Shorthand for `connection(false)`.
    pub fn dedicated_connection(&self) -> Result<DedicatedLease<D>, PoolError<DriverError<D>>> {
        let conn = self.inner.acquire_dedicated()?;
        Ok(DedicatedLease::new(Arc::clone(&self.inner), conn))
    }

    /// An unpooled steady connection: an escape hatch bypassing admission
    /// control entirely.
    pub fn steady_connection(&self) -> Result<SteadyConnection<D>, DriverError<D>> {
        SteadyConnection::connect(Arc::clone(&self.inner.driver), self.inner.steady_config.clone())
    }

    /// Drain the pool: close every idle and shared connection. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// A snapshot of the pool's admission state.
    pub fn state(&self) -> PoolState {
        self.inner.state()
    }
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pool({:p})", Arc::as_ptr(&self.inner))
    }
}

/// Either kind of lease [`Pool::connection`] can hand back.
pub enum Lease<D: Driver> {
    /// An exclusively-held connection.
    Dedicated(DedicatedLease<D>),
    /// A connection shared with other concurrent users.
    Shared(SharedLease<D>),
}

impl<D: Driver> Lease<D> {
    /// Release the lease. Idempotent; also runs automatically on drop.
    pub fn close(&mut self) {
        match self {
            Lease::Dedicated(lease) => lease.close(),
            Lease::Shared(lease) => lease.close(),
        }
    }
}

impl<D: Driver> fmt::Debug for Lease<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lease::Dedicated(lease) => f.debug_tuple("Lease::Dedicated").field(lease).finish(),
            Lease::Shared(lease) => f.debug_tuple("Lease::Shared").field(lease).finish(),
        }
    }
}
