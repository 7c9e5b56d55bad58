//! A minimal mock [`Driver`] used only by this crate's own unit tests.
#![cfg(test)]

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::driver::{Driver, RawConnection, RawCursor, ThreadSafety};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MockError;

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock error")
    }
}

impl std::error::Error for MockError {}

pub(crate) struct MockCursor;

impl RawCursor for MockCursor {
    type Error = MockError;
    type InputSizes = ();

    fn close(&mut self) -> Result<(), MockError> {
        Ok(())
    }
    fn set_input_sizes(&mut self, _sizes: &()) {}
    fn set_output_size(&mut self, _size: usize, _column: Option<usize>) {}
}

pub(crate) struct MockConnection {
    pub(crate) id: u32,
}

impl RawConnection for MockConnection {
    type Cursor = MockCursor;
    type Error = MockError;

    fn cursor(&mut self) -> Result<MockCursor, MockError> {
        Ok(MockCursor)
    }
    fn close(&mut self) -> Result<(), MockError> {
        Ok(())
    }
    fn commit(&mut self) -> Result<(), MockError> {
        Ok(())
    }
    fn rollback(&mut self) -> Result<(), MockError> {
        Ok(())
    }
    fn exec_session_statement(&mut self, _statement: &str) -> Result<(), MockError> {
        Ok(())
    }
}

pub(crate) struct MockDriver {
    next_id: AtomicU32,
    thread_safety: ThreadSafety,
}

impl MockDriver {
    pub(crate) fn new(thread_safety: ThreadSafety) -> Self {
        MockDriver {
            next_id: AtomicU32::new(0),
            thread_safety,
        }
    }
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    fn connect(&self) -> Result<MockConnection, MockError> {
        Ok(MockConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn thread_safety(&self) -> ThreadSafety {
        self.thread_safety
    }

    fn is_failover_error(&self, _err: &MockError) -> bool {
        true
    }

    fn usage_exceeded_error(&self) -> MockError {
        MockError
    }
}
