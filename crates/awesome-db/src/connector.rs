//! Driver seam: the traits every backend implements, placeholder rewriting,
//! and the runtime-selected backend used by the default [`Database`].
//!
//! [`Database`]: crate::Database

use std::borrow::Cow;
use std::future::Future;

use crate::config::{Backend, PoolConfig};
use crate::error::DriverError;
use crate::postgres::{PgConn, PgConnector};
use crate::sqlite::{SqliteConn, SqliteConnector};
use crate::value::{Row, Value};

/// Native parameter syntax of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`, passed through untouched.
    QuestionMark,
    /// `$1`, `$2`, ...
    Numbered,
}

impl PlaceholderStyle {
    /// Rewrites neutral `?` placeholders into this style. Question marks inside
    /// quoted literals and identifiers are left alone.
    pub fn rewrite<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        if *self == Self::QuestionMark || !sql.contains('?') {
            return Cow::Borrowed(sql);
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut quote: Option<char> = None;
        let mut index = 0usize;
        for ch in sql.chars() {
            match quote {
                Some(open) => {
                    if ch == open {
                        quote = None;
                    }
                    out.push(ch);
                }
                None if ch == '\'' || ch == '"' => {
                    quote = Some(ch);
                    out.push(ch);
                }
                None if ch == '?' => {
                    index += 1;
                    out.push('$');
                    out.push_str(&index.to_string());
                }
                None => out.push(ch),
            }
        }
        Cow::Owned(out)
    }
}

/// One live database connection.
///
/// Statements arrive already rewritten into [`Connection::placeholder_style`].
pub trait Connection: Send + 'static {
    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Runs a read and returns at most `limit` rows.
    fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<Row>, DriverError>> + Send;

    /// Runs a write and returns the affected-row count.
    fn execute(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> impl Future<Output = Result<u64, DriverError>> + Send;

    fn begin(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn commit(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn rollback(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;
}

/// Opens connections for a pool.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    fn connect(&self) -> impl Future<Output = Result<Self::Conn, DriverError>> + Send;
}

/// Connection to whichever backend the configuration selected.
pub enum AnyConnection {
    Sqlite(SqliteConn),
    Postgres(PgConn),
}

impl Connection for AnyConnection {
    fn placeholder_style(&self) -> PlaceholderStyle {
        match self {
            Self::Sqlite(conn) => conn.placeholder_style(),
            Self::Postgres(conn) => conn.placeholder_style(),
        }
    }

    async fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        limit: Option<usize>,
    ) -> Result<Vec<Row>, DriverError> {
        match self {
            Self::Sqlite(conn) => conn.query(sql, args, limit).await,
            Self::Postgres(conn) => conn.query(sql, args, limit).await,
        }
    }

    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64, DriverError> {
        match self {
            Self::Sqlite(conn) => conn.execute(sql, args).await,
            Self::Postgres(conn) => conn.execute(sql, args).await,
        }
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        match self {
            Self::Sqlite(conn) => conn.begin().await,
            Self::Postgres(conn) => conn.begin().await,
        }
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        match self {
            Self::Sqlite(conn) => conn.commit().await,
            Self::Postgres(conn) => conn.commit().await,
        }
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        match self {
            Self::Sqlite(conn) => conn.rollback().await,
            Self::Postgres(conn) => conn.rollback().await,
        }
    }
}

pub enum AnyConnector {
    Sqlite(SqliteConnector),
    Postgres(PgConnector),
}

impl AnyConnector {
    pub fn from_config(config: &PoolConfig) -> Self {
        match config.backend {
            Backend::Sqlite => Self::Sqlite(SqliteConnector::new(&config.db)),
            Backend::Postgres => Self::Postgres(PgConnector::new(config)),
        }
    }
}

impl Connector for AnyConnector {
    type Conn = AnyConnection;

    async fn connect(&self) -> Result<AnyConnection, DriverError> {
        match self {
            Self::Sqlite(connector) => connector.connect().await.map(AnyConnection::Sqlite),
            Self::Postgres(connector) => connector.connect().await.map(AnyConnection::Postgres),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_placeholders_are_positional() {
        let sql = PlaceholderStyle::Numbered.rewrite("UPDATE t SET a=?, b=? WHERE id=?");
        assert_eq!(sql, "UPDATE t SET a=$1, b=$2 WHERE id=$3");
    }

    #[test]
    fn quoted_question_marks_are_kept() {
        let sql = PlaceholderStyle::Numbered
            .rewrite(r#"SELECT "what?" FROM t WHERE note = 'why?' AND id = ?"#);
        assert_eq!(sql, r#"SELECT "what?" FROM t WHERE note = 'why?' AND id = $1"#);
    }

    #[test]
    fn question_mark_style_borrows() {
        let sql = PlaceholderStyle::QuestionMark.rewrite("SELECT ? FROM t");
        assert!(matches!(sql, Cow::Borrowed("SELECT ? FROM t")));
    }
}
