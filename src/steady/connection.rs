use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::driver::{Driver, DriverError, RawConnection};
use crate::ping::PingMask;
use crate::steady::cursor::SteadyCursor;

/// A caller-supplied override for [`Driver::is_failover_error`], consulted
/// before the driver's own classification.
pub type FailoverOverride<D> = Arc<dyn Fn(&DriverError<D>) -> bool + Send + Sync>;

/// Configuration replayed on every (re)open of a [`SteadyConnection`].
pub struct SteadyConfig<D: Driver> {
    /// Non-zero caps the number of successful cursor operations before the
    /// next cursor acquisition forces a reopen. Zero means unlimited.
    pub max_usage: u32,
    /// SQL statements run, in order, immediately after every successful
    /// (re)open and before the connection is handed to anyone.
    pub setsession: Vec<String>,
    /// When to health-check the connection.
    pub ping_mask: PingMask,
    /// If false, `close()` performs a rollback-reset instead of tearing
    /// the connection down.
    pub closeable: bool,
    /// Consulted ahead of [`Driver::is_failover_error`] when classifying an
    /// error; `None` defers to the driver entirely.
    pub failure_override: Option<FailoverOverride<D>>,
}

impl<D: Driver> Clone for SteadyConfig<D> {
    fn clone(&self) -> Self {
        SteadyConfig {
            max_usage: self.max_usage,
            setsession: self.setsession.clone(),
            ping_mask: self.ping_mask,
            closeable: self.closeable,
            failure_override: self.failure_override.clone(),
        }
    }
}

impl<D: Driver> Default for SteadyConfig<D> {
    fn default() -> Self {
        SteadyConfig {
            max_usage: 0,
            setsession: Vec::new(),
            ping_mask: PingMask::ON_CHECKOUT,
            closeable: true,
            failure_override: None,
        }
    }
}

impl<D: Driver> fmt::Debug for SteadyConfig<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteadyConfig")
            .field("max_usage", &self.max_usage)
            .field("setsession", &self.setsession)
            .field("ping_mask", &self.ping_mask)
            .field("closeable", &self.closeable)
            .field("failure_override", &self.failure_override.is_some())
            .finish()
    }
}

/// A self-healing wrapper around one driver connection.
///
/// Tracks usage count, enforces an optional usage cap by forcing a
/// reopen, and on a failover-class driver error attempts one
/// reopen-and-retry, preserving the invariant that a transaction never
/// silently survives a connection swap.
pub struct SteadyConnection<D: Driver> {
    driver: Arc<D>,
    raw: Option<D::Connection>,
    max_usage: u32,
    setsession: Vec<String>,
    ping_mask: PingMask,
    closeable: bool,
    failure_override: Option<FailoverOverride<D>>,
    usage: u32,
    in_transaction: bool,
    closed: bool,
}

impl<D: Driver> SteadyConnection<D> {
    /// Open a brand-new steady connection: connect, run `setsession`, and
    /// fail the whole operation (closing the raw handle first) if session
    /// initialization errors.
    pub fn connect(driver: Arc<D>, config: SteadyConfig<D>) -> Result<Self, DriverError<D>> {
        let mut raw = driver.connect()?;
        if let Err(err) = run_setsession(&mut raw, &config.setsession) {
            let _ = raw.close();
            return Err(err);
        }
        debug!("steady connection opened");
        Ok(SteadyConnection {
            driver,
            raw: Some(raw),
            max_usage: config.max_usage,
            setsession: config.setsession,
            ping_mask: config.ping_mask,
            closeable: config.closeable,
            failure_override: config.failure_override,
            usage: 0,
            in_transaction: false,
            closed: false,
        })
    }

    /// The driver's thread-safety level.
    pub fn thread_safety(&self) -> crate::driver::ThreadSafety {
        self.driver.thread_safety()
    }

    /// Number of successful cursor operations since the last (re)open.
    pub fn usage(&self) -> u32 {
        self.usage
    }

    /// Whether a transaction is currently open (`begin()` called, no
    /// matching `commit()`/`rollback()` yet).
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Whether this connection has been permanently torn down.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn raw_mut(&mut self) -> &mut D::Connection {
        self.raw
            .as_mut()
            .expect("steady connection used after being closed")
    }

    fn reopen(&mut self) -> Result<(), DriverError<D>> {
        let mut fresh = self.driver.connect()?;
        if let Err(err) = run_setsession(&mut fresh, &self.setsession) {
            let _ = fresh.close();
            return Err(err);
        }
        if let Some(mut old) = self.raw.take() {
            let _ = old.close();
        }
        self.raw = Some(fresh);
        self.usage = 0;
        self.in_transaction = false;
        debug!("steady connection reopened");
        Ok(())
    }

    /// Open a new cursor, applying the forced-reopen-on-usage-cap and
    /// ping-on-cursor-creation rules, with one reopen-and-retry attempt on
    /// a failover-class error.
    pub fn cursor(&mut self) -> Result<SteadyCursor<'_, D>, DriverError<D>> {
        let raw_cursor = self.open_cursor()?;
        Ok(SteadyCursor::new(self, raw_cursor))
    }

    pub(crate) fn open_cursor(&mut self) -> Result<D::Cursor, DriverError<D>> {
        let transaction = self.in_transaction;
        if !transaction {
            let _ = self.ping_check(PingMask::ON_CURSOR, true);
        }

        if self.max_usage > 0 && self.usage >= self.max_usage {
            let error = self.driver.usage_exceeded_error();
            return self.reopen_and_retry_cursor(transaction, error);
        }

        match self.raw_mut().cursor() {
            Ok(c) => Ok(c),
            Err(error) => {
                if !self.is_failover_error(&error) {
                    return Err(error);
                }
                self.reopen_and_retry_cursor(transaction, error)
            }
        }
    }

    fn reopen_and_retry_cursor(
        &mut self,
        transaction: bool,
        error: DriverError<D>,
    ) -> Result<D::Cursor, DriverError<D>> {
        match self.reopen() {
            Ok(()) => match self.raw_mut().cursor() {
                Ok(cursor) if !transaction => Ok(cursor),
                Ok(_) => {
                    warn!("cursor reopened mid-transaction; transaction is lost");
                    Err(error)
                }
                Err(_) => {
                    if transaction {
                        self.in_transaction = false;
                    }
                    Err(error)
                }
            },
            Err(_) => {
                if transaction {
                    self.in_transaction = false;
                }
                Err(error)
            }
        }
    }

    /// Start a transaction. Forwards to the driver's `begin` if it has one.
    pub fn begin(&mut self) -> Result<(), DriverError<D>> {
        self.in_transaction = true;
        self.raw_mut().begin()
    }

    /// Commit the current transaction. On a failover-class error, rotates
    /// the connection (best-effort) and re-raises the *original* error.
    pub fn commit(&mut self) -> Result<(), DriverError<D>> {
        self.in_transaction = false;
        match self.raw_mut().commit() {
            Ok(()) => Ok(()),
            Err(error) => {
                if self.is_failover_error(&error) {
                    let _ = self.reopen();
                }
                Err(error)
            }
        }
    }

    /// Roll back the current transaction. Same failover treatment as
    /// [`commit`](SteadyConnection::commit).
    pub fn rollback(&mut self) -> Result<(), DriverError<D>> {
        self.in_transaction = false;
        match self.raw_mut().rollback() {
            Ok(()) => Ok(()),
            Err(error) => {
                if self.is_failover_error(&error) {
                    let _ = self.reopen();
                }
                Err(error)
            }
        }
    }

    /// Cancel whatever's in flight, if the driver supports it.
    pub fn cancel(&mut self) -> Result<(), DriverError<D>> {
        self.in_transaction = false;
        self.raw_mut().cancel()
    }

    /// Run `f` inside a transaction: commit on success, roll back on
    /// failure.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, DriverError<D>>,
    ) -> Result<T, DriverError<D>> {
        self.begin()?;
        match f(self) {
            Ok(value) => self.commit().map(|()| value),
            Err(err) => {
                let _ = self.rollback();
                Err(err)
            }
        }
    }

    /// Release the connection. If `closeable`, tears the raw handle down;
    /// otherwise rolls back any open transaction and keeps the connection
    /// alive. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.closeable {
            if let Some(mut raw) = self.raw.take() {
                let _ = raw.close();
            }
            self.closed = true;
        } else if self.in_transaction {
            let _ = self.rollback();
        }
    }

    /// Best-effort rollback: rolls back if `force` or a transaction is
    /// still open. Used by the pool when a connection is returned.
    pub fn reset(&mut self, force: bool) {
        if !self.closed && (force || self.in_transaction) {
            let _ = self.rollback();
        }
    }

    pub(crate) fn usage_exceeded(&self) -> bool {
        self.max_usage > 0 && self.usage >= self.max_usage
    }

    pub(crate) fn driver_usage_exceeded_error(&self) -> DriverError<D> {
        self.driver.usage_exceeded_error()
    }

    pub(crate) fn bump_usage(&mut self) {
        self.usage += 1;
    }

    pub(crate) fn is_failover_error(&self, err: &DriverError<D>) -> bool {
        match &self.failure_override {
            Some(f) => f(err),
            None => self.driver.is_failover_error(err),
        }
    }

    pub(crate) fn clear_transaction_flag(&mut self) {
        self.in_transaction = false;
    }

    /// Connect and run `setsession` on a brand new raw connection, without
    /// touching `self` at all. Used by [`SteadyCursor`]'s fresh-connection
    /// recovery step, which only adopts the result once it has proven it
    /// can open a cursor.
    pub(crate) fn create_fresh(&self) -> Result<D::Connection, DriverError<D>> {
        let mut fresh = self.driver.connect()?;
        if let Err(err) = run_setsession(&mut fresh, &self.setsession) {
            let _ = fresh.close();
            return Err(err);
        }
        Ok(fresh)
    }

    /// Replace the raw connection with one already proven live (from
    /// [`create_fresh`](Self::create_fresh)), closing the old one and
    /// resetting usage/transaction bookkeeping.
    pub(crate) fn adopt(&mut self, conn: D::Connection) {
        if let Some(mut old) = self.raw.take() {
            let _ = old.close();
        }
        self.raw = Some(conn);
        self.usage = 0;
        self.in_transaction = false;
    }

    pub(crate) fn ping_check(&mut self, bit: PingMask, mut reconnect: bool) -> Option<bool> {
        if !self.ping_mask.contains(bit) {
            return None;
        }
        let alive = match self.raw_mut().ping() {
            None => {
                self.ping_mask = PingMask::empty();
                return None;
            }
            Some(Ok(alive)) => {
                if alive {
                    reconnect = false;
                }
                alive
            }
            Some(Err(_)) => false,
        };
        if !alive && reconnect && !self.in_transaction {
            if self.reopen().is_ok() {
                return Some(true);
            }
        }
        Some(alive)
    }
}

fn run_setsession<C: RawConnection>(raw: &mut C, statements: &[String]) -> Result<(), C::Error> {
    for statement in statements {
        raw.exec_session_statement(statement)?;
    }
    Ok(())
}

impl<D: Driver> Drop for SteadyConnection<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D> std::fmt::Debug for SteadyConnection<D>
where
    D: Driver,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteadyConnection")
            .field("usage", &self.usage)
            .field("in_transaction", &self.in_transaction)
            .field("closed", &self.closed)
            .finish()
    }
}
