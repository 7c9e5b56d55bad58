use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::driver::{Driver, DriverError};
use crate::error::PoolError;
use crate::pool::PoolShared;
use crate::steady::SteadyConnection;

/// A proxy for an exclusively-leased steady connection.
///
/// `close()` returns the connection to the pool's idle cache rather than
/// tearing it down; it is idempotent, and runs automatically on drop as a
/// safety net for a leaked lease.
pub struct DedicatedLease<D: Driver> {
    pool: Arc<PoolShared<D>>,
    conn: Option<SteadyConnection<D>>,
}

impl<D: Driver> DedicatedLease<D> {
    pub(crate) fn new(pool: Arc<PoolShared<D>>, conn: SteadyConnection<D>) -> Self {
        DedicatedLease {
            pool,
            conn: Some(conn),
        }
    }

    /// The underlying steady connection. Fails with
    /// [`PoolError::InvalidConnection`] once [`close`](Self::close) has run.
    pub fn get(&self) -> Result<&SteadyConnection<D>, PoolError<DriverError<D>>> {
        self.conn.as_ref().ok_or(PoolError::InvalidConnection)
    }

    /// Mutable access to the underlying steady connection.
    pub fn get_mut(&mut self) -> Result<&mut SteadyConnection<D>, PoolError<DriverError<D>>> {
        self.conn.as_mut().ok_or(PoolError::InvalidConnection)
    }

    /// Return the connection to the pool. Idempotent.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.cache(conn);
        }
    }
}

impl<D: Driver> Drop for DedicatedLease<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: Driver> fmt::Debug for DedicatedLease<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedicatedLease")
            .field("closed", &self.conn.is_none())
            .finish()
    }
}

/// A proxy for a steady connection shared among one or more concurrent
/// callers. Access to the underlying connection goes through
/// [`lock`](Self::lock) rather than a bare reference, since more than one
/// `SharedLease` may hold the same record at once
/// (see [`SharedRecord`](crate::pool::internals::SharedRecord)).
///
/// `close()` decrements the record's share count and, once it reaches
/// zero, returns the connection to the idle cache.
pub struct SharedLease<D: Driver> {
    pool: Arc<PoolShared<D>>,
    conn: Option<Arc<Mutex<SteadyConnection<D>>>>,
}

impl<D: Driver> SharedLease<D> {
    pub(crate) fn new(pool: Arc<PoolShared<D>>, conn: Arc<Mutex<SteadyConnection<D>>>) -> Self {
        SharedLease {
            pool,
            conn: Some(conn),
        }
    }

    /// Lock the underlying steady connection for the lifetime of the
    /// returned guard. Fails with [`PoolError::InvalidConnection`] once
    /// [`close`](Self::close) has run.
    ///
    /// Prefer [`begin`](Self::begin)/[`commit`](Self::commit)/
    /// [`rollback`](Self::rollback) over calling those methods through a
    /// raw guard: the pool's admission ordering reads a record's
    /// transaction state off its own bookkeeping, not by locking the
    /// connection, so a transaction started through a raw guard is
    /// invisible to it.
    pub fn lock(&self) -> Result<MutexGuard<'_, SteadyConnection<D>>, PoolError<DriverError<D>>> {
        let conn = self.conn.as_ref().ok_or(PoolError::InvalidConnection)?;
        Ok(conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn conn(&self) -> Result<&Arc<Mutex<SteadyConnection<D>>>, PoolError<DriverError<D>>> {
        self.conn.as_ref().ok_or(PoolError::InvalidConnection)
    }

    /// Start a transaction and mark the record busy so concurrent
    /// acquisitions skip it until it's committed or rolled back.
    pub fn begin(&self) -> Result<(), PoolError<DriverError<D>>> {
        let conn = self.conn()?;
        let result = conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .begin();
        self.pool.set_shared_transaction(conn, true);
        result.map_err(PoolError::Driver)
    }

    /// Commit the current transaction and mark the record free again.
    pub fn commit(&self) -> Result<(), PoolError<DriverError<D>>> {
        let conn = self.conn()?;
        let result = conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .commit();
        self.pool.set_shared_transaction(conn, false);
        result.map_err(PoolError::Driver)
    }

    /// Roll back the current transaction and mark the record free again.
    pub fn rollback(&self) -> Result<(), PoolError<DriverError<D>>> {
        let conn = self.conn()?;
        let result = conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .rollback();
        self.pool.set_shared_transaction(conn, false);
        result.map_err(PoolError::Driver)
    }

    /// Unshare the connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.unshare(conn);
        }
    }
}

impl<D: Driver> Drop for SharedLease<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: Driver> fmt::Debug for SharedLease<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLease")
            .field("closed", &self.conn.is_none())
            .finish()
    }
}
