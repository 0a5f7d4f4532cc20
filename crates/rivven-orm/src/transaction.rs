//! Scoped transaction discipline
//!
//! A mutation spans exactly one connection and one transaction. The guard
//! turns auto-commit off for its lifetime and puts the previous setting back
//! on every exit path, so the connection returns to the pool in the state it
//! was borrowed in.

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::Result;

/// Transaction guard over a borrowed connection.
///
/// Dropping the guard without [`commit`](TransactionScope::commit) rolls the
/// transaction back.
pub struct TransactionScope<'c> {
    conn: &'c dyn Connection,
    prior_auto_commit: bool,
    finished: bool,
}

impl<'c> TransactionScope<'c> {
    /// Disable auto-commit and start a transaction scope
    pub fn begin(conn: &'c dyn Connection) -> Result<Self> {
        let prior_auto_commit = conn.auto_commit();
        if prior_auto_commit {
            conn.set_auto_commit(false)?;
        }
        Ok(Self {
            conn,
            prior_auto_commit,
            finished: false,
        })
    }

    /// Connection the scope runs on
    pub fn connection(&self) -> &'c dyn Connection {
        self.conn
    }

    /// Commit and restore the prior auto-commit setting
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let committed = self.conn.commit();
        if committed.is_err() {
            self.rollback_quietly();
        }
        self.restore();
        committed
    }

    /// Roll back and restore the prior auto-commit setting
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        let rolled_back = self.conn.rollback();
        self.restore();
        rolled_back
    }

    fn rollback_quietly(&self) {
        if let Err(e) = self.conn.rollback() {
            warn!(
                error = %e,
                detail = ?e.technical_detail(),
                "transaction rollback failed"
            );
        }
    }

    fn restore(&self) {
        if self.conn.auto_commit() != self.prior_auto_commit {
            if let Err(e) = self.conn.set_auto_commit(self.prior_auto_commit) {
                warn!(error = %e, "failed to restore auto-commit");
            }
        }
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("transaction scope dropped without commit, rolling back");
            self.rollback_quietly();
            self.restore();
        }
    }
}

/// Run `f` inside a transaction on `conn`.
///
/// Commits when `f` succeeds. When `f` fails the transaction is rolled back
/// and the original error is returned; a failing rollback is logged and never
/// replaces it.
pub fn in_transaction<R, F>(conn: &dyn Connection, f: F) -> Result<R>
where
    F: FnOnce(&dyn Connection) -> Result<R>,
{
    let scope = TransactionScope::begin(conn)?;
    match f(scope.connection()) {
        Ok(value) => {
            scope.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = scope.rollback() {
                warn!(
                    error = %rollback_err,
                    cause = %e,
                    "rollback failed after transaction error"
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{DatabaseType, InsertOutcome};
    use crate::error::Error;
    use crate::types::{Row, Value};
    use parking_lot::Mutex;

    /// Records transaction control calls
    #[derive(Default)]
    struct Recorder {
        auto_commit: Mutex<Option<bool>>,
        log: Mutex<Vec<&'static str>>,
        fail_rollback: bool,
    }

    impl Recorder {
        fn events(&self) -> Vec<&'static str> {
            self.log.lock().clone()
        }
    }

    impl Connection for Recorder {
        fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
            self.log.lock().push("execute");
            Ok(1)
        }

        fn execute_returning_key(
            &self,
            _sql: &str,
            _params: &[Value],
            _key_column: &str,
        ) -> Result<InsertOutcome> {
            Ok(InsertOutcome {
                affected: 1,
                generated_key: None,
            })
        }

        fn auto_commit(&self) -> bool {
            self.auto_commit.lock().unwrap_or(true)
        }

        fn set_auto_commit(&self, enabled: bool) -> Result<()> {
            *self.auto_commit.lock() = Some(enabled);
            self.log
                .lock()
                .push(if enabled { "auto_commit=on" } else { "auto_commit=off" });
            Ok(())
        }

        fn in_transaction(&self) -> bool {
            false
        }

        fn commit(&self) -> Result<()> {
            self.log.lock().push("commit");
            Ok(())
        }

        fn rollback(&self) -> Result<()> {
            self.log.lock().push("rollback");
            if self.fail_rollback {
                Err(Error::transaction("connection lost"))
            } else {
                Ok(())
            }
        }

        fn is_valid(&self) -> bool {
            true
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }

        fn database_type(&self) -> DatabaseType {
            DatabaseType::SQLite
        }
    }

    #[test]
    fn test_commit_restores_auto_commit() {
        let conn = Recorder::default();
        let n = in_transaction(&conn, |c| c.execute("UPDATE t SET a = 1", &[])).unwrap();

        assert_eq!(n, 1);
        assert_eq!(
            conn.events(),
            vec!["auto_commit=off", "execute", "commit", "auto_commit=on"]
        );
    }

    #[test]
    fn test_error_rolls_back_and_keeps_cause() {
        let conn = Recorder {
            fail_rollback: true,
            ..Default::default()
        };

        let err = in_transaction(&conn, |_| -> Result<()> {
            Err(Error::data_integrity("no persistable fields"))
        })
        .unwrap_err();

        assert!(matches!(err, Error::DataIntegrity { .. }));
        assert_eq!(
            conn.events(),
            vec!["auto_commit=off", "rollback", "auto_commit=on"]
        );
        assert!(conn.auto_commit());
    }

    #[test]
    fn test_dropped_scope_rolls_back() {
        let conn = Recorder::default();
        {
            let _scope = TransactionScope::begin(&conn).unwrap();
        }
        assert_eq!(
            conn.events(),
            vec!["auto_commit=off", "rollback", "auto_commit=on"]
        );
    }

    #[test]
    fn test_manual_mode_is_left_alone() {
        let conn = Recorder::default();
        conn.set_auto_commit(false).unwrap();

        in_transaction(&conn, |_| Ok(())).unwrap();

        assert_eq!(conn.events(), vec!["auto_commit=off", "commit"]);
        assert!(!conn.auto_commit());
    }
}
