//! Tests for rivven-orm pool module

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rivven_orm::prelude::*;

/// Connection that only tracks its own health and transaction flags
struct MockConnection {
    healthy: Arc<AtomicBool>,
    auto_commit: AtomicBool,
    in_tx: AtomicBool,
}

impl Connection for MockConnection {
    fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
        if !self.auto_commit.load(Ordering::SeqCst) {
            self.in_tx.store(true, Ordering::SeqCst);
        }
        Ok(1)
    }

    fn execute_returning_key(
        &self,
        sql: &str,
        params: &[Value],
        _key_column: &str,
    ) -> Result<InsertOutcome> {
        Ok(InsertOutcome {
            affected: self.execute(sql, params)?,
            generated_key: Some(Value::Int64(1)),
        })
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.in_tx.store(false, Ordering::SeqCst);
        }
        self.auto_commit.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx.load(Ordering::SeqCst)
    }

    fn commit(&self) -> Result<()> {
        self.in_tx.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.in_tx.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}

struct MockFactory {
    opened: AtomicUsize,
    healthy: Arc<AtomicBool>,
}

impl MockFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: AtomicUsize::new(0),
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }
}

impl ConnectionFactory for MockFactory {
    fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            healthy: self.healthy.clone(),
            auto_commit: AtomicBool::new(true),
            in_tx: AtomicBool::new(false),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}

fn pool_with(factory: Arc<MockFactory>, config: PoolConfig) -> Arc<SimpleConnectionPool> {
    create_pool_with_config(config, factory).unwrap()
}

// ==================== PoolConfig Tests ====================

#[test]
fn test_pool_config_default() {
    let config = PoolConfig::default();

    assert_eq!(config.min_size, 1);
    assert_eq!(config.max_size, 10);
    assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    assert_eq!(config.idle_timeout, Duration::from_secs(600));
    assert!(config.test_on_borrow);
    assert!(!config.test_on_return);
}

#[test]
fn test_invalid_sizes_rejected() {
    let err = create_pool_with_config(PoolConfig::new("sqlite::memory:").with_max_size(0), MockFactory::new())
        .err()
        .unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);

    let err = create_pool_with_config(
        PoolConfig::new("sqlite::memory:")
            .with_min_size(5)
            .with_max_size(2),
        MockFactory::new(),
    )
    .err()
    .unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

// ==================== Acquisition Tests ====================

#[test]
fn test_min_size_opened_eagerly() {
    let factory = MockFactory::new();
    let pool = pool_with(
        factory.clone(),
        PoolConfig::new("sqlite::memory:")
            .with_min_size(3)
            .with_max_size(5),
    );

    assert_eq!(factory.opened.load(Ordering::SeqCst), 3);
    assert_eq!(pool.size(), 3);
    assert_eq!(pool.idle(), 3);
}

#[test]
fn test_connections_are_reused() {
    let factory = MockFactory::new();
    let pool = pool_with(factory.clone(), PoolConfig::new("sqlite::memory:").with_max_size(2));

    for _ in 0..5 {
        let conn = pool.get().unwrap();
        conn.execute("SELECT 1", &[]).unwrap();
    }

    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().acquisitions, 5);
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn test_exhaustion_times_out() {
    let pool = pool_with(
        MockFactory::new(),
        PoolConfig::new("sqlite::memory:")
            .with_max_size(1)
            .with_acquire_timeout(Duration::from_millis(50)),
    );

    let held = pool.get().unwrap();
    let started = Instant::now();
    let err = pool.get().err().unwrap();

    assert_eq!(err.category(), ErrorCategory::PoolExhausted);
    assert!(err.is_retriable());
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(pool.stats().exhausted_count, 1);

    drop(held);
    assert!(pool.get().is_ok());
}

#[test]
fn test_waiter_wakes_on_release() {
    let pool = pool_with(
        MockFactory::new(),
        PoolConfig::new("sqlite::memory:")
            .with_max_size(1)
            .with_acquire_timeout(Duration::from_secs(5)),
    );

    let held = pool.get().unwrap();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.get().map(|_| ()))
    };
    thread::sleep(Duration::from_millis(50));
    drop(held);

    assert!(waiter.join().unwrap().is_ok());
    assert_eq!(pool.size(), 1);
}

#[test]
fn test_concurrent_borrowers_never_exceed_max_size() {
    let pool = pool_with(
        MockFactory::new(),
        PoolConfig::new("sqlite::memory:")
            .with_min_size(0)
            .with_max_size(3),
    );
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let peak = peak.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    let _conn = pool.get().unwrap();
                    peak.fetch_max(pool.in_use(), Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(pool.size() <= 3);
}

// ==================== Health and Lifecycle Tests ====================

#[test]
fn test_unhealthy_connection_replaced_on_borrow() {
    let factory = MockFactory::new();
    let pool = pool_with(factory.clone(), PoolConfig::new("sqlite::memory:").with_max_size(2));
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);

    factory.healthy.store(false, Ordering::SeqCst);
    let conn = pool.get().unwrap();

    assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    assert!(pool.stats().health_check_failures >= 1);
    drop(conn);
}

#[test]
fn test_release_restores_connection_state() {
    let pool = pool_with(MockFactory::new(), PoolConfig::new("sqlite::memory:").with_max_size(1));

    {
        let conn = pool.get().unwrap();
        conn.set_auto_commit(false).unwrap();
        conn.execute("UPDATE t SET x = 1", &[]).unwrap();
        assert!(conn.in_transaction());
    }

    let conn = pool.get().unwrap();
    assert!(conn.auto_commit());
    assert!(!conn.in_transaction());
}

fn address(conn: &PooledConnection) -> usize {
    conn.connection() as *const dyn Connection as *const () as usize
}

#[test]
fn test_creation_time_follows_its_connection() {
    let pool = pool_with(
        MockFactory::new(),
        PoolConfig::new("sqlite::memory:")
            .with_min_size(1)
            .with_max_size(2),
    );

    let older = pool.get().unwrap();
    thread::sleep(Duration::from_millis(5));
    let newer = pool.get().unwrap();
    assert!(older.created_at() < newer.created_at());

    let ages = [
        (address(&older), older.created_at()),
        (address(&newer), newer.created_at()),
    ];
    // Released oldest first
    drop(older);
    drop(newer);

    let first = pool.get().unwrap();
    let second = pool.get().unwrap();
    for conn in [&first, &second] {
        let (_, created_at) = ages
            .iter()
            .find(|(addr, _)| *addr == address(conn))
            .unwrap();
        assert_eq!(conn.created_at(), *created_at);
    }
}

#[test]
fn test_close_rejects_new_borrowers() {
    let pool = pool_with(MockFactory::new(), PoolConfig::new("sqlite::memory:").with_min_size(2));
    pool.close().unwrap();

    assert_eq!(pool.idle(), 0);
    let err = pool.get().err().unwrap();
    assert_eq!(err.category(), ErrorCategory::PoolExhausted);
}

#[test]
fn test_create_pool_from_config() {
    let pool = create_pool(&OrmConfig::new("sqlite::memory:").with_max_pool_size(2)).unwrap();
    assert_eq!(pool.config().max_size, 2);
    assert_eq!(pool.dialect().name(), "SQLite");

    let err = create_pool(&OrmConfig::new("oracle://db")).err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}
