//! `SteadyConnection`/`SteadyCursor` scenarios exercised directly, without
//! a pool in front: forced reopen on a usage cap, and failover retries
//! both inside and outside a transaction.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use steadypool::{SteadyConfig, SteadyConnection, ThreadSafety};

use common::{Event, MockDriver, OPERATIONAL_ERROR};

#[test]
fn forced_reopen_on_usage_cap() {
    let _ = env_logger::try_init();
    let driver = Arc::new(MockDriver::new(ThreadSafety::Connection));
    let config = SteadyConfig {
        max_usage: 20,
        ..Default::default()
    };
    let mut conn = SteadyConnection::connect(Arc::clone(&driver), config).unwrap();

    let mut ids = Vec::with_capacity(100);
    for _ in 0..100 {
        let id = conn
            .cursor()
            .unwrap()
            .execute(|c: &mut common::MockCursor| Ok(c.conn_id))
            .unwrap();
        ids.push(id);
        assert!(conn.usage() <= 20, "usage must never exceed the cap");
    }

    for block in ids.chunks(20) {
        let first = block[0];
        assert!(block.iter().all(|id| *id == first), "each block of 20 stays on one connection");
    }
    let distinct: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(distinct.len(), 5, "100 ops over a cap of 20 spans 5 connections");
    assert_eq!(driver.connects.load(Ordering::SeqCst), 5);
}

#[test]
fn failover_outside_transaction_rotates_cursor_only() {
    let driver = Arc::new(MockDriver::new(ThreadSafety::Connection));
    let mut conn = SteadyConnection::connect(Arc::clone(&driver), SteadyConfig::default()).unwrap();

    let original_id = conn
        .cursor()
        .unwrap()
        .execute(|c: &mut common::MockCursor| Ok(c.conn_id))
        .unwrap();

    let attempt = AtomicUsize::new(0);
    let result = conn.cursor().unwrap().execute(|_c: &mut common::MockCursor| {
        if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(OPERATIONAL_ERROR)
        } else {
            Ok(_c.conn_id)
        }
    });

    assert_eq!(result.unwrap(), original_id);
    assert_eq!(driver.connects.load(Ordering::SeqCst), 1, "no new connection was opened");
    assert!(!conn.in_transaction());
}

#[test]
fn failover_inside_transaction_rotates_connection() {
    let driver = Arc::new(MockDriver::new(ThreadSafety::Connection));
    let mut conn = SteadyConnection::connect(Arc::clone(&driver), SteadyConfig::default()).unwrap();
    conn.begin().unwrap();

    let attempt = AtomicUsize::new(0);
    let result = conn.cursor().unwrap().execute(|_c: &mut common::MockCursor| {
        if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(OPERATIONAL_ERROR)
        } else {
            Ok(_c.conn_id)
        }
    });

    assert_eq!(result.unwrap_err().to_string(), OPERATIONAL_ERROR.to_string());
    assert_eq!(
        driver.connects.load(Ordering::SeqCst),
        2,
        "a new connection was opened to replace the lost transaction"
    );
    assert!(!conn.in_transaction(), "the lost transaction's flag was cleared");

    let closed: Vec<_> = driver
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Close(_)))
        .collect();
    assert_eq!(closed.len(), 1, "the original connection was torn down");
}

mod reopen_for_usage_cap_sanity {
    use super::*;

    #[test]
    fn reopened_connection_resets_usage() {
        let driver = Arc::new(MockDriver::new(ThreadSafety::Connection));
        let config = SteadyConfig {
            max_usage: 1,
            ..Default::default()
        };
        let mut conn = SteadyConnection::connect(Arc::clone(&driver), config).unwrap();
        assert_eq!(conn.usage(), 0);
        conn.cursor()
            .unwrap()
            .execute(|c: &mut common::MockCursor| Ok(c.conn_id))
            .unwrap();
        assert_eq!(conn.usage(), 1);
        // The next cursor open hits the cap and forces a reopen before the
        // cursor is even handed back.
        let _ = conn.cursor().unwrap();
        assert_eq!(conn.usage(), 0);
    }
}
