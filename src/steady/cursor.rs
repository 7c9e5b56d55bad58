use crate::driver::{Driver, DriverError, RawConnection, RawCursor};
use crate::error::PoolError;
use crate::steady::connection::SteadyConnection;

/// A driver cursor wrapped with the failover discipline.
///
/// Only `execute*`/`call*`-shaped operations — run through
/// [`execute`](SteadyCursor::execute) and [`call`](SteadyCursor::call) —
/// get the reopen-and-retry treatment. Anything else (fetching rows,
/// iterating) reaches the driver cursor directly through
/// [`raw`](SteadyCursor::raw)/[`raw_mut`](SteadyCursor::raw_mut).
pub struct SteadyCursor<'a, D: Driver> {
    conn: &'a mut SteadyConnection<D>,
    raw: Option<D::Cursor>,
    input_sizes: Option<<D::Cursor as RawCursor>::InputSizes>,
    output_sizes: Vec<(Option<usize>, usize)>,
    closed: bool,
}

impl<'a, D: Driver> SteadyCursor<'a, D> {
    pub(crate) fn new(conn: &'a mut SteadyConnection<D>, raw: D::Cursor) -> Self {
        SteadyCursor {
            conn,
            raw: Some(raw),
            input_sizes: None,
            output_sizes: Vec::new(),
            closed: false,
        }
    }

    /// Store input-size hints, to be replayed before every `execute*` call
    /// (including after a cursor is rotated during recovery).
    pub fn set_input_sizes(&mut self, sizes: <D::Cursor as RawCursor>::InputSizes) {
        if let Some(cursor) = self.raw.as_mut() {
            cursor.set_input_sizes(&sizes);
        }
        self.input_sizes = Some(sizes);
    }

    /// Store an output-size hint, optionally scoped to one column.
    pub fn set_output_size(&mut self, size: usize, column: Option<usize>) {
        if let Some(cursor) = self.raw.as_mut() {
            cursor.set_output_size(size, column);
        }
        self.output_sizes.push((column, size));
    }

    fn clear_sizes(&mut self) {
        self.input_sizes = None;
        self.output_sizes.clear();
    }

    fn apply_sizes(&self, cursor: &mut D::Cursor) {
        if let Some(sizes) = &self.input_sizes {
            cursor.set_input_sizes(sizes);
        }
        for &(column, size) in &self.output_sizes {
            cursor.set_output_size(size, column);
        }
    }

    /// The underlying driver cursor, for operations the steady layer
    /// doesn't need to intercept (fetching, iteration, ...).
    pub fn raw(&self) -> Result<&D::Cursor, PoolError<DriverError<D>>> {
        self.raw.as_ref().ok_or(PoolError::InvalidCursor)
    }

    /// Mutable access to the underlying driver cursor.
    pub fn raw_mut(&mut self) -> Result<&mut D::Cursor, PoolError<DriverError<D>>> {
        self.raw.as_mut().ok_or(PoolError::InvalidCursor)
    }

    /// Run an `execute*`-shaped operation through the failover protocol.
    /// Stored input/output sizes are re-applied to the driver cursor first
    /// (and cleared on success).
    pub fn execute<T>(
        &mut self,
        op: impl FnMut(&mut D::Cursor) -> Result<T, DriverError<D>>,
    ) -> Result<T, PoolError<DriverError<D>>> {
        self.tough(true, op)
    }

    /// Run a `call*`-shaped operation through the failover protocol. Sizes
    /// are not replayed (only `execute*` does that).
    pub fn call<T>(
        &mut self,
        op: impl FnMut(&mut D::Cursor) -> Result<T, DriverError<D>>,
    ) -> Result<T, PoolError<DriverError<D>>> {
        self.tough(false, op)
    }

    fn tough<T>(
        &mut self,
        reapply_sizes: bool,
        mut op: impl FnMut(&mut D::Cursor) -> Result<T, DriverError<D>>,
    ) -> Result<T, PoolError<DriverError<D>>> {
        if self.closed {
            return Err(PoolError::InvalidCursor);
        }

        let transaction = self.conn.in_transaction();
        if !transaction {
            let _ = self.conn.ping_check(crate::ping::PingMask::ON_EXECUTE, true);
        }

        if self.conn_usage_exceeded() {
            let error = self.conn.driver_usage_exceeded_error();
            return self.recover(transaction, error, reapply_sizes, op);
        }

        if reapply_sizes {
            let cursor = self.raw.as_mut().ok_or(PoolError::InvalidCursor)?;
            self.apply_sizes_to(cursor);
        }

        let result = {
            let cursor = self.raw.as_mut().ok_or(PoolError::InvalidCursor)?;
            op(cursor)
        };

        match result {
            Ok(value) => {
                if reapply_sizes {
                    self.clear_sizes();
                }
                self.conn.bump_usage();
                Ok(value)
            }
            Err(error) => {
                if !self.conn.is_failover_error(&error) {
                    return Err(PoolError::Driver(error));
                }
                self.recover(transaction, error, reapply_sizes, op)
            }
        }
    }

    fn conn_usage_exceeded(&self) -> bool {
        self.conn.usage_exceeded()
    }

    fn apply_sizes_to(&self, cursor: &mut D::Cursor) {
        self.apply_sizes(cursor);
    }

    /// Two-step recovery: try a fresh cursor on the same connection
    /// (unless in a transaction), then a fresh connection outright. If
    /// every path fails, the *original* error is what's reported, not
    /// whatever the retries ran into along the way.
    fn recover<T>(
        &mut self,
        transaction: bool,
        error: DriverError<D>,
        reapply_sizes: bool,
        mut op: impl FnMut(&mut D::Cursor) -> Result<T, DriverError<D>>,
    ) -> Result<T, PoolError<DriverError<D>>> {
        if !transaction {
            if let Ok(mut fresh_cursor) = self.conn.open_cursor() {
                if reapply_sizes {
                    self.apply_sizes(&mut fresh_cursor);
                }
                if let Ok(value) = op(&mut fresh_cursor) {
                    if let Some(mut old) = self.raw.take() {
                        let _ = old.close();
                    }
                    self.raw = Some(fresh_cursor);
                    if reapply_sizes {
                        self.clear_sizes();
                    }
                    self.conn.bump_usage();
                    return Ok(value);
                }
                let _ = fresh_cursor.close();
            }
        }

        // Fresh connection. Always attempted if the same-connection retry
        // above didn't already return. Builds the replacement connection
        // off to the side and only adopts it once a cursor is provably
        // open on it, so a total failure leaves the existing (broken)
        // connection in place for the caller to close.
        let mut fresh_conn = match self.conn.create_fresh() {
            Ok(conn) => conn,
            Err(_) => {
                if transaction {
                    self.conn.clear_transaction_flag();
                }
                return Err(PoolError::Driver(error));
            }
        };
        let fresh_cursor = match fresh_conn.cursor() {
            Ok(cursor) => cursor,
            Err(_) => {
                let _ = fresh_conn.close();
                if transaction {
                    self.conn.clear_transaction_flag();
                }
                return Err(PoolError::Driver(error));
            }
        };

        if transaction {
            // The transaction is already lost; adopt the new connection
            // and cursor anyway (there's nothing better to keep) and
            // re-raise the original error.
            self.conn.adopt(fresh_conn);
            self.raw = Some(fresh_cursor);
            return Err(PoolError::Driver(error));
        }

        let mut fresh_cursor = fresh_cursor;
        if reapply_sizes {
            self.apply_sizes(&mut fresh_cursor);
        }
        match op(&mut fresh_cursor) {
            Ok(value) => {
                self.conn.adopt(fresh_conn);
                self.raw = Some(fresh_cursor);
                if reapply_sizes {
                    self.clear_sizes();
                }
                self.conn.bump_usage();
                Ok(value)
            }
            Err(second_error) => {
                self.conn.adopt(fresh_conn);
                self.raw = Some(fresh_cursor);
                if self.conn.is_failover_error(&second_error) {
                    // Same class of failure as the first attempt: report
                    // the original error, not this retry's.
                    Err(PoolError::Driver(error))
                } else {
                    Err(PoolError::Driver(second_error))
                }
            }
        }
    }

    /// Close the cursor. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(mut cursor) = self.raw.take() {
            let _ = cursor.close();
        }
        self.closed = true;
    }
}

impl<'a, D: Driver> Drop for SteadyCursor<'a, D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<'a, D: Driver> std::fmt::Debug for SteadyCursor<'a, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteadyCursor")
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::driver::ThreadSafety;
    use crate::error::PoolError;
    use crate::steady::connection::{SteadyConfig, SteadyConnection};
    use crate::test_support::MockDriver;

    fn connect() -> SteadyConnection<MockDriver> {
        let driver = Arc::new(MockDriver::new(ThreadSafety::Connection));
        SteadyConnection::connect(driver, SteadyConfig::default()).unwrap()
    }

    #[test]
    fn closed_cursor_rejects_raw_access() {
        let mut conn = connect();
        let mut cursor = conn.cursor().unwrap();
        cursor.close();
        assert!(matches!(cursor.raw(), Err(PoolError::InvalidCursor)));
        assert!(matches!(cursor.raw_mut(), Err(PoolError::InvalidCursor)));
    }

    #[test]
    fn closed_cursor_rejects_execute() {
        let mut conn = connect();
        let mut cursor = conn.cursor().unwrap();
        cursor.close();
        let result = cursor.execute(|_| Ok(()));
        assert!(matches!(result, Err(PoolError::InvalidCursor)));
    }

    #[test]
    fn close_is_idempotent() {
        let mut conn = connect();
        let mut cursor = conn.cursor().unwrap();
        cursor.close();
        cursor.close();
        assert!(matches!(cursor.raw(), Err(PoolError::InvalidCursor)));
    }
}
