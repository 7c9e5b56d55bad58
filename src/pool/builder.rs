use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex};

use log::debug;

use crate::driver::{Driver, DriverError, ThreadSafety};
use crate::error::PoolError;
use crate::ping::PingMask;
use crate::pool::internals::PoolInternals;
use crate::pool::{Pool, PoolShared};
use crate::steady::{FailoverOverride, SteadyConfig, SteadyConnection};

/// A builder for a [`Pool`]: every knob is validated once, at
/// [`build`](Builder::build), rather than at each setter.
pub struct Builder<D: Driver> {
    min_cached: usize,
    max_cached: usize,
    max_shared: usize,
    max_connections: usize,
    blocking: bool,
    max_usage: u32,
    setsession: Vec<String>,
    reset: bool,
    ping_mask: PingMask,
    failure_override: Option<FailoverOverride<D>>,
    _driver: PhantomData<D>,
}

impl<D: Driver> Default for Builder<D> {
    fn default() -> Self {
        Builder {
            min_cached: 0,
            max_cached: 0,
            max_shared: 0,
            max_connections: 0,
            blocking: false,
            max_usage: 0,
            setsession: Vec::new(),
            reset: true,
            ping_mask: PingMask::ON_CHECKOUT,
            failure_override: None,
            _driver: PhantomData,
        }
    }
}

impl<D: Driver> std::fmt::Debug for Builder<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("min_cached", &self.min_cached)
            .field("max_cached", &self.max_cached)
            .field("max_shared", &self.max_shared)
            .field("max_connections", &self.max_connections)
            .field("blocking", &self.blocking)
            .field("max_usage", &self.max_usage)
            .field("reset", &self.reset)
            .finish()
    }
}

impl<D: Driver> Builder<D> {
    /// A new builder with sensible defaults.
    pub fn new() -> Self {
        Default::default()
    }

    /// How many connections to open up front, at [`build`](Builder::build)
    /// time, filling the idle cache before the pool is handed back.
    ///
    /// Defaults to 0.
    pub fn min_cached(mut self, min_cached: usize) -> Self {
        self.min_cached = min_cached;
        self
    }

    /// Idle-cache cap; 0 means unbounded. Raised to `min_cached` if set
    /// lower than it.
    ///
    /// Defaults to 0.
    pub fn max_cached(mut self, max_cached: usize) -> Self {
        self.max_cached = max_cached;
        self
    }

    /// Cap on distinct shared connections; 0 disables sharing outright.
    /// Forced to 0 when the driver reports thread-safety below
    /// [`ThreadSafety::Connection`].
    ///
    /// Defaults to 0.
    pub fn max_shared(mut self, max_shared: usize) -> Self {
        self.max_shared = max_shared;
        self
    }

    /// Admission cap across dedicated loans and shared records combined;
    /// 0 means unbounded. Raised to `max(max_cached, max_shared)` if set
    /// lower than either.
    ///
    /// Defaults to 0.
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// `true` waits on saturation; `false` fails fast with
    /// [`PoolError::TooManyConnections`] instead of suspending.
    ///
    /// Defaults to `false`.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Per-connection usage cap forcing a reopen; 0 means unlimited.
    /// Replayed into every [`SteadyConnection`] the pool creates.
    ///
    /// Defaults to 0.
    pub fn max_usage(mut self, max_usage: u32) -> Self {
        self.max_usage = max_usage;
        self
    }

    /// SQL statements replayed on every fresh raw connection.
    ///
    /// Defaults to empty.
    pub fn setsession(mut self, setsession: Vec<String>) -> Self {
        self.setsession = setsession;
        self
    }

    /// `true` always rolls back on return; `false` rolls back only if a
    /// transaction is still open.
    ///
    /// Defaults to `true`.
    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Liveness-check policy.
    ///
    /// Defaults to [`PingMask::ON_CHECKOUT`].
    pub fn ping(mut self, ping_mask: PingMask) -> Self {
        self.ping_mask = ping_mask;
        self
    }

    /// Override [`Driver::is_failover_error`] with a closure consulted
    /// first when classifying an error as failover-class.
    ///
    /// Defaults to deferring entirely to the driver.
    pub fn failure_override(
        mut self,
        f: impl Fn(&DriverError<D>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.failure_override = Some(Arc::new(f));
        self
    }

    /// Validate the configuration, warm up `min_cached` connections, and
    /// return a ready-to-use [`Pool`].
    pub fn build(mut self, driver: D) -> Result<Pool<D>, PoolError<DriverError<D>>> {
        if driver.thread_safety() == ThreadSafety::None {
            return Err(PoolError::NotSupported);
        }

        if self.max_cached > 0 && self.max_cached < self.min_cached {
            self.max_cached = self.min_cached;
        }
        if driver.thread_safety() < ThreadSafety::Connection {
            self.max_shared = 0;
        }
        if self.max_connections > 0 {
            if self.max_connections < self.max_cached {
                self.max_connections = self.max_cached;
            }
            if self.max_connections < self.max_shared {
                self.max_connections = self.max_shared;
            }
        }

        let steady_config = SteadyConfig {
            max_usage: self.max_usage,
            setsession: self.setsession.clone(),
            ping_mask: self.ping_mask,
            closeable: true,
            failure_override: self.failure_override.clone(),
        };

        let driver = Arc::new(driver);
        let shared = Arc::new(PoolShared {
            driver: Arc::clone(&driver),
            min_cached: self.min_cached,
            max_cached: self.max_cached,
            max_shared: self.max_shared,
            max_connections: self.max_connections,
            blocking: self.blocking,
            reset: self.reset,
            steady_config,
            internals: Mutex::new(PoolInternals::new()),
            condvar: Condvar::new(),
        });

        let pool = Pool { inner: shared };
        for _ in 0..pool.inner.min_cached {
            let conn = SteadyConnection::connect(
                Arc::clone(&pool.inner.driver),
                pool.inner.steady_config.clone(),
            )?;
            pool.inner.internals.lock().unwrap().idle.push_back(conn);
        }
        debug!("pool warmed up with {} connections", pool.inner.min_cached);
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockDriver;

    #[test]
    fn thread_safety_none_is_rejected() {
        let driver = MockDriver::new(ThreadSafety::None);
        let result = Builder::new().build(driver);
        assert!(matches!(result, Err(PoolError::NotSupported)));
    }

    #[test]
    fn max_cached_is_raised_to_min_cached() {
        let driver = MockDriver::new(ThreadSafety::Connection);
        let pool = Builder::new()
            .min_cached(4)
            .max_cached(1)
            .build(driver)
            .unwrap();
        assert_eq!(pool.inner.max_cached, 4);
    }

    #[test]
    fn sharing_is_disabled_below_connection_thread_safety() {
        let driver = MockDriver::new(ThreadSafety::Module);
        let pool = Builder::new().max_shared(10).build(driver).unwrap();
        assert_eq!(pool.inner.max_shared, 0);
    }

    #[test]
    fn max_connections_is_raised_to_cover_both_caches() {
        let driver = MockDriver::new(ThreadSafety::Connection);
        let pool = Builder::new()
            .max_cached(2)
            .max_shared(5)
            .max_connections(1)
            .build(driver)
            .unwrap();
        assert_eq!(pool.inner.max_connections, 5);
    }

    #[test]
    fn min_cached_warms_up_the_idle_cache() {
        let driver = MockDriver::new(ThreadSafety::Connection);
        let pool = Builder::new().min_cached(3).build(driver).unwrap();
        assert_eq!(pool.state().idle, 3);
    }
}
