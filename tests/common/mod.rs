//! An in-memory mock driver used by the integration tests. Not a real
//! database: `connect()` just hands out an incrementing connection id, and
//! every lifecycle call (`commit`/`rollback`/`close`/`ping`) is recorded to a
//! shared event log so a test can assert on exactly what happened to exactly
//! which connection.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use steadypool::{Driver, RawConnection, RawCursor, ThreadSafety};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(u32),
    Close(u32),
    Commit(u32),
    Rollback(u32),
    SessionStatement(u32, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockError(pub &'static str);

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock driver error: {}", self.0)
    }
}

impl std::error::Error for MockError {}

/// A failover-class error a test can inject from an `execute`/`call`
/// closure to exercise the reopen-and-retry path.
pub const OPERATIONAL_ERROR: MockError = MockError("operational error");
/// A non-failover error: the pool must propagate this untouched.
pub const PROGRAMMING_ERROR: MockError = MockError("programming error");

pub struct MockCursor {
    pub conn_id: u32,
}

impl RawCursor for MockCursor {
    type Error = MockError;
    type InputSizes = ();

    fn close(&mut self) -> Result<(), MockError> {
        Ok(())
    }

    fn set_input_sizes(&mut self, _sizes: &()) {}

    fn set_output_size(&mut self, _size: usize, _column: Option<usize>) {}
}

pub struct MockConnection {
    pub id: u32,
    events: Arc<Mutex<Vec<Event>>>,
    pub alive: Arc<Mutex<bool>>,
}

impl RawConnection for MockConnection {
    type Cursor = MockCursor;
    type Error = MockError;

    fn cursor(&mut self) -> Result<MockCursor, MockError> {
        Ok(MockCursor { conn_id: self.id })
    }

    fn close(&mut self) -> Result<(), MockError> {
        self.events.lock().unwrap().push(Event::Close(self.id));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), MockError> {
        self.events.lock().unwrap().push(Event::Commit(self.id));
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), MockError> {
        self.events.lock().unwrap().push(Event::Rollback(self.id));
        Ok(())
    }

    fn ping(&mut self) -> Option<Result<bool, MockError>> {
        Some(Ok(*self.alive.lock().unwrap()))
    }

    fn exec_session_statement(&mut self, statement: &str) -> Result<(), MockError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::SessionStatement(self.id, statement.to_string()));
        Ok(())
    }
}

pub struct MockDriver {
    next_id: AtomicU32,
    pub events: Arc<Mutex<Vec<Event>>>,
    pub connects: Arc<AtomicUsize>,
    thread_safety: ThreadSafety,
}

impl MockDriver {
    pub fn new(thread_safety: ThreadSafety) -> Self {
        MockDriver {
            next_id: AtomicU32::new(0),
            events: Arc::new(Mutex::new(Vec::new())),
            connects: Arc::new(AtomicUsize::new(0)),
            thread_safety,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    fn connect(&self) -> Result<MockConnection, MockError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(Event::Connect(id));
        Ok(MockConnection {
            id,
            events: Arc::clone(&self.events),
            alive: Arc::new(Mutex::new(true)),
        })
    }

    fn thread_safety(&self) -> ThreadSafety {
        self.thread_safety
    }

    fn is_failover_error(&self, err: &MockError) -> bool {
        *err == OPERATIONAL_ERROR
    }

    fn usage_exceeded_error(&self) -> MockError {
        OPERATIONAL_ERROR
    }
}
