//! Connection pool for rivven-orm
//!
//! The pool is the only shared mutable resource of the engine. It bounds
//! the number of concurrently open connections; every broker call borrows
//! a connection for its own duration and hands it back on drop.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_orm::pool::{PoolConfig, SimpleConnectionPool};
//! use rivven_orm::sqlite::SqliteConnectionFactory;
//!
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::new("sqlite://app.db").with_max_size(4),
//!     Arc::new(SqliteConnectionFactory::new()),
//! )?;
//!
//! let conn = pool.get()?;
//! conn.execute("DELETE FROM sessions", &[])?;
//! // Connection is returned to pool when dropped
//! ```

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::OrmConfig;
use crate::connection::{connection_factory_for, Connection, ConnectionConfig, ConnectionFactory};
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};

/// Connection pool trait
pub trait ConnectionPool: Send + Sync {
    /// Get a connection from the pool, blocking up to the acquire timeout
    fn get(&self) -> Result<PooledConnection>;

    /// Return a connection to the pool, along with the time it was opened
    fn release(&self, conn: Box<dyn Connection>, created_at: Instant);

    /// Get current pool size
    fn size(&self) -> usize;

    /// Get number of idle connections
    fn idle(&self) -> usize;

    /// Get number of connections in use
    fn in_use(&self) -> usize {
        self.size().saturating_sub(self.idle())
    }

    /// Get pool statistics
    fn stats(&self) -> PoolStats;

    /// SQL dialect of the pooled connections
    fn dialect(&self) -> Arc<dyn SqlDialect>;

    /// Close all connections and shutdown the pool
    fn close(&self) -> Result<()>;
}

/// A connection borrowed from the pool
pub struct PooledConnection {
    /// The underlying connection
    conn: Option<Box<dyn Connection>>,
    /// Pool the connection goes back to
    pool: Arc<dyn ConnectionPool>,
    /// When the underlying connection was opened
    created_at: Instant,
}

impl PooledConnection {
    /// Create a new pooled connection wrapper
    pub fn new(
        conn: Box<dyn Connection>,
        pool: Arc<dyn ConnectionPool>,
        created_at: Instant,
    ) -> Self {
        Self {
            conn: Some(conn),
            pool,
            created_at,
        }
    }

    /// When the underlying connection was opened
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &dyn Connection {
        &**self
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_ref() {
            Some(conn) => conn.as_ref(),
            // `conn` is only taken in drop
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.created_at);
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection configuration
    pub connection: ConnectionConfig,
    /// Minimum pool size (idle connections opened eagerly)
    pub min_size: usize,
    /// Maximum pool size
    pub max_size: usize,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Maximum connection lifetime (for recycling)
    pub max_lifetime: Duration,
    /// Idle timeout (connections idle longer are closed)
    pub idle_timeout: Duration,
    /// Whether to test connections on borrow
    pub test_on_borrow: bool,
    /// Whether to test connections on return
    pub test_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(1800), // 30 minutes
            idle_timeout: Duration::from_secs(600),  // 10 minutes
            test_on_borrow: true,
            test_on_return: false,
        }
    }
}

impl PoolConfig {
    /// Create pool config from a connection URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Default::default()
        }
    }

    /// Set minimum pool size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable test on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    /// Enable/disable test on return
    pub fn with_test_on_return(mut self, test: bool) -> Self {
        self.test_on_return = test;
        self
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of connections created
    pub connections_created: u64,
    /// Total number of connections closed
    pub connections_closed: u64,
    /// Total number of connection acquisitions
    pub acquisitions: u64,
    /// Number of times pool was exhausted
    pub exhausted_count: u64,
    /// Total wait time for connections (in milliseconds)
    pub total_wait_time_ms: u64,
    /// Number of health check failures
    pub health_check_failures: u64,
}

/// Atomic pool stats for concurrent updates
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicPoolStats {
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub acquisitions: AtomicU64,
    pub exhausted_count: AtomicU64,
    pub total_wait_time_ms: AtomicU64,
    pub health_check_failures: AtomicU64,
}

impl AtomicPoolStats {
    /// Create new atomic stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection creation
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection close
    pub fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acquisition
    pub fn record_acquisition(&self, wait_time_ms: u64) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_ms
            .fetch_add(wait_time_ms, Ordering::Relaxed);
    }

    /// Record pool exhaustion
    pub fn record_exhausted(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record health check failure
    pub fn record_health_check_failure(&self) {
        self.health_check_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current stats
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            total_wait_time_ms: self.total_wait_time_ms.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
        }
    }

    /// Calculate average wait time in milliseconds
    pub fn avg_wait_time_ms(&self) -> f64 {
        let acquisitions = self.acquisitions.load(Ordering::Relaxed);
        if acquisitions == 0 {
            0.0
        } else {
            self.total_wait_time_ms.load(Ordering::Relaxed) as f64 / acquisitions as f64
        }
    }
}

/// Pool builder for fluent configuration
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    /// Create a new pool builder
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: PoolConfig::new(url),
        }
    }

    /// Set minimum pool size
    pub fn min_size(mut self, size: usize) -> Self {
        self.config.min_size = size;
        self
    }

    /// Set maximum pool size
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// Set acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Set max lifetime
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Enable test on borrow
    pub fn test_on_borrow(mut self, test: bool) -> Self {
        self.config.test_on_borrow = test;
        self
    }

    /// Get the configuration
    pub fn config(self) -> PoolConfig {
        self.config
    }

    /// Build the pool with the factory matching the URL scheme
    pub fn build(self) -> Result<Arc<SimpleConnectionPool>> {
        let factory = connection_factory_for(&self.config.connection.url)?;
        SimpleConnectionPool::new(self.config, factory)
    }
}

// ============================================================================
// SimpleConnectionPool
// ============================================================================

/// Blocking connection pool with a fixed upper bound.
///
/// Admission is controlled by a mutex-protected counter and a condvar:
/// callers beyond `max_size` wait until a connection is released or the
/// acquire timeout elapses. Idle connections are reused LIFO.
pub struct SimpleConnectionPool {
    /// Pool configuration
    config: PoolConfig,
    /// Connection factory
    factory: Arc<dyn ConnectionFactory>,
    /// Dialect of the factory's backend
    dialect: Arc<dyn SqlDialect>,
    /// Idle connections and the open-connection count
    state: Mutex<PoolState>,
    /// Signalled whenever a slot frees up
    available: Condvar,
    /// Statistics
    stats: AtomicPoolStats,
    /// Shutdown flag
    shutdown: AtomicBool,
    /// Self reference for creating PooledConnections
    self_ref: Weak<Self>,
}

struct PoolState {
    idle: Vec<PoolEntry>,
    /// Open connections, idle and borrowed
    total: usize,
}

/// Internal pool entry with metadata
struct PoolEntry {
    /// The connection
    conn: Box<dyn Connection>,
    /// When the connection was created
    created_at: Instant,
    /// When last used
    last_used: Instant,
}

impl SimpleConnectionPool {
    /// Create a new connection pool.
    ///
    /// Opens `min_size` connections eagerly; a failure there is returned
    /// to the caller so misconfiguration surfaces at startup.
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        if config.max_size == 0 {
            return Err(Error::config("pool max_size must be at least 1"));
        }
        if config.min_size > config.max_size {
            return Err(Error::config(format!(
                "pool min_size ({}) exceeds max_size ({})",
                config.min_size, config.max_size
            )));
        }

        let dialect = factory.dialect();
        let pool = Arc::new_cyclic(|weak| Self {
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(config.max_size),
                total: 0,
            }),
            available: Condvar::new(),
            config: config.clone(),
            factory,
            dialect,
            stats: AtomicPoolStats::new(),
            shutdown: AtomicBool::new(false),
            self_ref: weak.clone(),
        });

        for _ in 0..config.min_size {
            let conn = pool.create_connection()?;
            let now = Instant::now();
            let mut state = pool.state.lock();
            state.total += 1;
            state.idle.push(PoolEntry {
                conn,
                created_at: now,
                last_used: now,
            });
        }

        debug!(
            database = %pool.factory.database_type(),
            min_size = config.min_size,
            max_size = config.max_size,
            "connection pool initialized"
        );
        Ok(pool)
    }

    /// Create a new connection pool with a builder pattern.
    pub fn builder(url: impl Into<String>) -> PoolBuilder {
        PoolBuilder::new(url)
    }

    /// Create a new connection using the factory
    fn create_connection(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect(&self.config.connection)?;
        self.stats.record_created();
        Ok(conn)
    }

    /// Check if a connection should be recycled (expired)
    fn should_recycle(&self, entry: &PoolEntry) -> bool {
        entry.created_at.elapsed() > self.config.max_lifetime
            || entry.last_used.elapsed() > self.config.idle_timeout
    }

    fn discard(&self, conn: Box<dyn Connection>) {
        if let Err(e) = conn.close() {
            debug!(error = %e, "error closing discarded connection");
        }
        self.stats.record_closed();
    }

    /// Get pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn wrap(&self, conn: Box<dyn Connection>, created_at: Instant) -> Result<PooledConnection> {
        let pool: Arc<dyn ConnectionPool> = match self.self_ref.upgrade() {
            Some(pool) => pool as Arc<dyn ConnectionPool>,
            None => {
                return Err(Error::PoolExhausted {
                    message: "pool has been dropped".to_string(),
                })
            }
        };
        Ok(PooledConnection::new(conn, pool, created_at))
    }

    /// Take a slot: an idle connection if one is usable, otherwise permission
    /// to open a new one. Blocks while the pool is at capacity.
    fn acquire_slot(&self, deadline: Instant) -> Result<Option<PoolEntry>> {
        let mut state = self.state.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(Error::PoolExhausted {
                    message: "pool is shut down".to_string(),
                });
            }

            while let Some(entry) = state.idle.pop() {
                if self.should_recycle(&entry) {
                    state.total -= 1;
                    self.discard(entry.conn);
                    continue;
                }
                return Ok(Some(entry));
            }

            if state.total < self.config.max_size {
                state.total += 1;
                return Ok(None);
            }

            if self.available.wait_until(&mut state, deadline).timed_out() {
                self.stats.record_exhausted();
                return Err(Error::PoolExhausted {
                    message: format!(
                        "timeout waiting for connection ({}ms, max_size={})",
                        self.config.acquire_timeout.as_millis(),
                        self.config.max_size
                    ),
                });
            }
        }
    }

    fn forget_slot(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }
}

impl ConnectionPool for SimpleConnectionPool {
    fn get(&self) -> Result<PooledConnection> {
        let start = Instant::now();
        let deadline = start + self.config.acquire_timeout;

        let (conn, created_at) = loop {
            match self.acquire_slot(deadline)? {
                Some(entry) => {
                    if self.config.test_on_borrow && !entry.conn.is_valid() {
                        self.stats.record_health_check_failure();
                        self.discard(entry.conn);
                        self.forget_slot();
                        continue;
                    }
                    break (entry.conn, entry.created_at);
                }
                None => match self.create_connection() {
                    Ok(conn) => break (conn, Instant::now()),
                    Err(e) => {
                        self.forget_slot();
                        return Err(e);
                    }
                },
            }
        };

        self.stats
            .record_acquisition(start.elapsed().as_millis() as u64);
        self.wrap(conn, created_at)
    }

    fn release(&self, conn: Box<dyn Connection>, created_at: Instant) {
        // A borrower that bailed out mid-transaction must not leak it
        if conn.in_transaction() {
            if let Err(e) = conn.rollback() {
                warn!(error = %e, "rollback of abandoned transaction failed");
            }
        }
        if !conn.auto_commit() {
            if let Err(e) = conn.set_auto_commit(true) {
                warn!(error = %e, "failed to restore auto-commit on release");
            }
        }

        // A connection whose transaction could not be ended is not reusable
        let keep = !self.shutdown.load(Ordering::Acquire)
            && !conn.in_transaction()
            && (!self.config.test_on_return || conn.is_valid());

        let mut state = self.state.lock();
        if keep {
            state.idle.push(PoolEntry {
                conn,
                created_at,
                last_used: Instant::now(),
            });
        } else {
            state.total = state.total.saturating_sub(1);
            drop(state);
            if !self.shutdown.load(Ordering::Acquire) {
                self.stats.record_health_check_failure();
            }
            self.discard(conn);
        }
        self.available.notify_one();
    }

    fn size(&self) -> usize {
        self.state.lock().total
    }

    fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    fn dialect(&self) -> Arc<dyn SqlDialect> {
        self.dialect.clone()
    }

    fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        let drained: Vec<PoolEntry> = {
            let mut state = self.state.lock();
            let drained: Vec<PoolEntry> = state.idle.drain(..).collect();
            state.total = state.total.saturating_sub(drained.len());
            drained
        };
        for entry in drained {
            self.discard(entry.conn);
        }
        self.available.notify_all();
        Ok(())
    }
}

/// Create a connection pool from the engine configuration.
///
/// Picks the backend from the URL scheme.
pub fn create_pool(config: &OrmConfig) -> Result<Arc<SimpleConnectionPool>> {
    config.validate()?;
    let factory = connection_factory_for(&config.database_url)?;
    SimpleConnectionPool::new(config.to_pool_config(), factory)
}

/// Create a connection pool with custom configuration.
pub fn create_pool_with_config(
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
) -> Result<Arc<SimpleConnectionPool>> {
    SimpleConnectionPool::new(config, factory)
}
