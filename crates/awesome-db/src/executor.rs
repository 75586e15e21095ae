//! Pooled query execution.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::PoolConfig;
use crate::connector::{AnyConnection, AnyConnector, Connection, Connector};
use crate::error::{DbError, DriverError, Result};
use crate::pool::{AcquireError, AsyncPool, Lease};
use crate::value::{Row, Value};

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections open, idle or leased.
    pub in_flight: usize,
    pub idle_count: usize,
    pub max_size: usize,
}

struct Inner<C> {
    pool: Arc<AsyncPool<C>>,
    autocommit: bool,
    acquire_timeout: Option<Duration>,
}

/// Handle to a connection pool. Cheap to clone; every clone shares the pool.
pub struct Database<C: Connection = AnyConnection> {
    inner: Arc<Inner<C>>,
}

impl<C: Connection> Clone for Database<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Database {
    /// Opens a pool for the backend named in `config`.
    pub async fn connect(config: &PoolConfig) -> Result<Self> {
        Self::with_connector(config, AnyConnector::from_config(config)).await
    }
}

impl<C: Connection> Database<C> {
    /// Opens a pool over an explicit connector and pre-warms `min_size`
    /// connections.
    pub async fn with_connector<K>(config: &PoolConfig, connector: K) -> Result<Self>
    where
        K: Connector<Conn = C>,
    {
        config.validate()?;
        info!(
            "create database connection pool: backend={:?} db={} size={}..{}",
            config.backend, config.db, config.min_size, config.max_size
        );
        let connector = Arc::new(connector);
        let pool = AsyncPool::new(config.max_size, move || {
            let connector = Arc::clone(&connector);
            async move { connector.connect().await }
        });

        // Leases are held until every warm connection exists, otherwise the
        // pool would hand the first one back each time.
        let mut warm = Vec::with_capacity(config.min_size);
        for _ in 0..config.min_size {
            match pool.acquire(config.acquire_timeout(), None).await {
                Ok(lease) => warm.push(lease),
                Err(err) => {
                    pool.close();
                    let source: DriverError = match err {
                        AcquireError::Create(source) => source,
                        other => Box::new(DbError::from(other)),
                    };
                    error!("failed to initialize connection pool: {source}");
                    return Err(DbError::PoolInit(source));
                }
            }
        }
        drop(warm);

        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                autocommit: config.autocommit,
                acquire_timeout: config.acquire_timeout(),
            }),
        })
    }

    /// Leases a connection, waiting up to the configured acquire timeout.
    pub async fn lease(&self) -> Result<Lease<C>> {
        Ok(self.inner.pool.acquire(self.inner.acquire_timeout, None).await?)
    }

    /// Runs a read and returns at most `limit` rows.
    pub async fn query(&self, sql: &str, args: &[Value], limit: Option<usize>) -> Result<Vec<Row>> {
        info!("SQL: {sql}");
        let mut conn = self.lease().await?;
        let native = conn.placeholder_style().rewrite(sql);
        let rows = conn
            .query(&native, args, limit)
            .await
            .map_err(DbError::Query)?;
        info!("rows returned: {}", rows.len());
        Ok(rows)
    }

    /// Runs a write and returns the affected-row count.
    ///
    /// A transactional write commits on success and rolls back on failure.
    /// With `autocommit` disabled on the pool every write is transactional.
    pub async fn execute(&self, sql: &str, args: &[Value], transactional: bool) -> Result<u64> {
        info!("SQL: {sql}");
        let transactional = transactional || !self.inner.autocommit;
        let mut conn = self.lease().await?;
        let native = conn.placeholder_style().rewrite(sql);
        if !transactional {
            return conn.execute(&native, args).await.map_err(DbError::Exec);
        }

        // Dropped before COMMIT/ROLLBACK completes, the connection still has
        // an open transaction and must not go back to the pool.
        conn.set_reusable(false);
        conn.begin().await.map_err(DbError::Exec)?;
        match conn.execute(&native, args).await {
            Ok(affected) => {
                conn.commit().await.map_err(DbError::Exec)?;
                conn.set_reusable(true);
                Ok(affected)
            }
            Err(err) => {
                warn!("rolling back transaction: {err}");
                match conn.rollback().await {
                    Ok(()) => conn.set_reusable(true),
                    Err(rollback) => error!("rollback failed: {rollback}"),
                }
                Err(DbError::Exec(err))
            }
        }
    }

    /// Closes the pool. Later leases fail with [`DbError::PoolClosed`].
    pub fn close(&self) {
        info!("close database connection pool");
        self.inner.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            in_flight: self.inner.pool.size(),
            idle_count: self.inner.pool.idle_count(),
            max_size: self.inner.pool.max_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::connector::PlaceholderStyle;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Records every call; statements containing `FAIL` error out.
    struct Recorder {
        journal: Journal,
    }

    impl Recorder {
        fn log(&self, entry: impl Into<String>) {
            self.journal.lock().expect("journal").push(entry.into());
        }
    }

    impl Connection for Recorder {
        fn placeholder_style(&self) -> PlaceholderStyle {
            PlaceholderStyle::Numbered
        }

        async fn query(
            &mut self,
            sql: &str,
            _args: &[Value],
            _limit: Option<usize>,
        ) -> std::result::Result<Vec<Row>, DriverError> {
            self.log(sql);
            Ok(Vec::new())
        }

        async fn execute(
            &mut self,
            sql: &str,
            args: &[Value],
        ) -> std::result::Result<u64, DriverError> {
            self.log(sql);
            if sql.contains("FAIL") {
                return Err("statement failed".into());
            }
            Ok(args.len() as u64)
        }

        async fn begin(&mut self) -> std::result::Result<(), DriverError> {
            self.log("BEGIN");
            Ok(())
        }

        async fn commit(&mut self) -> std::result::Result<(), DriverError> {
            self.log("COMMIT");
            Ok(())
        }

        async fn rollback(&mut self) -> std::result::Result<(), DriverError> {
            self.log("ROLLBACK");
            Ok(())
        }
    }

    struct RecorderConnector {
        journal: Journal,
        refuse: bool,
    }

    impl Connector for RecorderConnector {
        type Conn = Recorder;

        async fn connect(&self) -> std::result::Result<Recorder, DriverError> {
            if self.refuse {
                return Err("connection refused".into());
            }
            Ok(Recorder {
                journal: Arc::clone(&self.journal),
            })
        }
    }

    async fn recorder_db(config: &PoolConfig) -> (Database<Recorder>, Journal) {
        let journal = Journal::default();
        let connector = RecorderConnector {
            journal: Arc::clone(&journal),
            refuse: false,
        };
        let db = Database::with_connector(config, connector)
            .await
            .expect("pool");
        (db, journal)
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().expect("journal").clone()
    }

    #[tokio::test]
    async fn placeholders_are_rewritten_for_the_driver() {
        let (db, journal) = recorder_db(&PoolConfig::new("u", "p", "d")).await;
        db.query("SELECT * FROM t WHERE a=? AND b=?", &[], None)
            .await
            .expect("query");
        assert_eq!(entries(&journal), ["SELECT * FROM t WHERE a=$1 AND b=$2"]);
    }

    #[tokio::test]
    async fn transactional_write_commits() {
        let (db, journal) = recorder_db(&PoolConfig::new("u", "p", "d")).await;
        let affected = db
            .execute("UPDATE t SET a=?", &[Value::Int(1)], true)
            .await
            .expect("execute");
        assert_eq!(affected, 1);
        assert_eq!(entries(&journal), ["BEGIN", "UPDATE t SET a=$1", "COMMIT"]);
        assert_eq!(db.stats().idle_count, 1);
    }

    #[tokio::test]
    async fn failed_transactional_write_rolls_back() {
        let (db, journal) = recorder_db(&PoolConfig::new("u", "p", "d")).await;
        let err = db.execute("FAIL", &[], true).await.unwrap_err();
        assert!(matches!(err, DbError::Exec(_)));
        assert_eq!(entries(&journal), ["BEGIN", "FAIL", "ROLLBACK"]);
        assert_eq!(db.stats().idle_count, 1);
    }

    #[tokio::test]
    async fn plain_write_skips_transaction() {
        let (db, journal) = recorder_db(&PoolConfig::new("u", "p", "d")).await;
        db.execute("DELETE FROM t", &[], false).await.expect("execute");
        assert_eq!(entries(&journal), ["DELETE FROM t"]);
    }

    #[tokio::test]
    async fn manual_commit_pool_wraps_every_write() {
        let mut config = PoolConfig::new("u", "p", "d");
        config.autocommit = false;
        let (db, journal) = recorder_db(&config).await;
        db.execute("DELETE FROM t", &[], false).await.expect("execute");
        assert_eq!(entries(&journal), ["BEGIN", "DELETE FROM t", "COMMIT"]);
    }

    #[tokio::test]
    async fn pool_prewarms_min_size() {
        let mut config = PoolConfig::new("u", "p", "d");
        config.min_size = 3;
        config.max_size = 5;
        let (db, _) = recorder_db(&config).await;
        assert_eq!(
            db.stats(),
            PoolStats {
                in_flight: 3,
                idle_count: 3,
                max_size: 5
            }
        );
    }

    #[tokio::test]
    async fn unreachable_backend_fails_init() {
        let connector = RecorderConnector {
            journal: Journal::default(),
            refuse: true,
        };
        let result = Database::with_connector(&PoolConfig::new("u", "p", "d"), connector).await;
        assert!(matches!(result, Err(DbError::PoolInit(_))));
    }

    #[tokio::test]
    async fn closed_database_refuses_work() {
        let (db, _) = recorder_db(&PoolConfig::new("u", "p", "d")).await;
        db.close();
        assert!(db.is_closed());
        let err = db.query("SELECT 1", &[], None).await.unwrap_err();
        assert!(matches!(err, DbError::PoolClosed));
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let mut config = PoolConfig::new("u", "p", "d");
        config.max_size = 1;
        config.acquire_timeout_ms = Some(10);
        let (db, _) = recorder_db(&config).await;
        let _held = db.lease().await.expect("lease");
        let err = db.query("SELECT 1", &[], None).await.unwrap_err();
        assert!(matches!(err, DbError::PoolTimeout));
    }
}
