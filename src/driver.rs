//! The contract a database driver must satisfy to be hardened by
//! [`SteadyConnection`](crate::steady::SteadyConnection) and multiplexed by
//! [`Pool`](crate::pool::Pool).
//!
//! Everything in this module is implemented by the caller, not by this
//! crate: the actual network/TLS/auth handshake, SQL dialect, and wire
//! format are out of scope.

use std::error::Error as StdError;

/// How many threads may safely touch connections produced by a [`Driver`].
///
/// Mirrors the DB-API 2 `threadsafety` descriptor: 0 means the driver
/// cannot be used from more than one thread at all, 1 means only the
/// module itself may be shared, 2 means individual connections may be
/// shared across threads, and 3 means even cursors may be shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadSafety {
    /// Not safe to use from more than one thread at a time, anywhere.
    None = 0,
    /// Only the driver module/type itself may be shared between threads.
    Module = 1,
    /// Individual connections may be shared between threads.
    Connection = 2,
    /// Individual cursors may be shared between threads.
    Cursor = 3,
}

/// A single driver-level cursor.
///
/// `execute*`/`call*`-style operations are not part of this trait: they are
/// invoked as closures through
/// [`SteadyCursor::execute`](crate::steady::SteadyCursor::execute) and
/// [`SteadyCursor::call`](crate::steady::SteadyCursor::call), since Rust has
/// no runtime equivalent of matching on an arbitrary method name. Only the
/// operations that the steady layer itself needs to intercept or replay are
/// part of the trait.
pub trait RawCursor: Send {
    /// The error type returned by the underlying driver.
    type Error: StdError + Send + Sync + 'static;
    /// Whatever the driver accepts as a `setinputsizes` argument.
    type InputSizes: Clone + Send;

    /// Close the driver cursor. Called at most once per cursor; the steady
    /// layer is responsible for idempotence.
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Apply input-size hints ahead of the next `execute*` call.
    fn set_input_sizes(&mut self, sizes: &Self::InputSizes);

    /// Apply an output-size hint, optionally scoped to one column.
    fn set_output_size(&mut self, size: usize, column: Option<usize>);
}

/// A single live driver connection.
pub trait RawConnection: Send {
    /// The cursor type this connection opens.
    type Cursor: RawCursor<Error = Self::Error>;
    /// The error type returned by the underlying driver.
    type Error: StdError + Send + Sync + 'static;

    /// Open a new driver cursor.
    fn cursor(&mut self) -> Result<Self::Cursor, Self::Error>;

    /// Tear down the connection for good.
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<(), Self::Error>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<(), Self::Error>;

    /// Start a transaction, if the driver needs an explicit call for that
    /// (most don't; the default is a no-op and `begin()` on the steady
    /// layer only flips its own bookkeeping in that case).
    fn begin(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Cancel whatever is in flight, if the driver supports it.
    fn cancel(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Check liveness. `None` means the driver has no ping facility at all
    /// (the steady layer will permanently stop probing). `Some(Ok(alive))`
    /// reports a definite answer; `Some(Err(_))` means the probe itself
    /// failed, which the steady layer treats as "not alive".
    fn ping(&mut self) -> Option<Result<bool, Self::Error>> {
        None
    }

    /// Run one session-initialization statement. Called once per statement,
    /// immediately after every successful (re)open, before the connection
    /// is handed to anyone.
    fn exec_session_statement(&mut self, statement: &str) -> Result<(), Self::Error>;
}

/// A capability provider: creates raw connections and classifies their
/// errors.
///
/// A `Driver` implementation typically owns whatever a real driver needs to
/// `connect()` again on every reopen (host, credentials, ...) as plain
/// fields.
pub trait Driver: Send + Sync + 'static {
    /// The connection type this driver produces.
    type Connection: RawConnection;

    /// Open a brand new raw connection.
    fn connect(&self) -> Result<Self::Connection, <Self::Connection as RawConnection>::Error>;

    /// The driver's thread-safety level.
    fn thread_safety(&self) -> ThreadSafety;

    /// Is this error one that should trigger the reopen-and-retry
    /// (failover) protocol? The sensible default is "no" so that only
    /// drivers which opt in by overriding this pay for the extra retry
    /// machinery; most drivers will want to match on their own
    /// operational/internal error variants here.
    fn is_failover_error(&self, _err: &<Self::Connection as RawConnection>::Error) -> bool {
        false
    }

    /// An exemplar error used purely to trigger the same recovery path as
    /// [`is_failover_error`](Driver::is_failover_error) when a usage cap is
    /// hit and a reopen must be forced even though nothing has actually
    /// failed yet.
    fn usage_exceeded_error(&self) -> <Self::Connection as RawConnection>::Error;
}

/// Shorthand for the error type a `Driver`'s connections produce.
pub type DriverError<D> = <<D as Driver>::Connection as RawConnection>::Error;
