//! SQLite connector. Calls run on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql, params_from_iter};

use crate::connector::{self, Connector, PlaceholderStyle};
use crate::error::DriverError;
use crate::value::{Row, Value};

const BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct SqliteConn {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConn {
    /// Opens `path` read-write, creating the file when missing.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<R, F>(&self, work: F) -> Result<R, DriverError>
    where
        F: FnOnce(&mut Connection) -> Result<R, rusqlite::Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| DriverError::from("sqlite connection lock poisoned"))?;
            work(&mut guard).map_err(DriverError::from)
        })
        .await
        .map_err(DriverError::from)?
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(v) => Self::Int(v),
            ValueRef::Real(v) => Self::Float(v),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Self::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

fn read_rows(
    conn: &Connection,
    sql: &str,
    args: &[Value],
    limit: Option<usize>,
) -> Result<Vec<Row>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let mut rows = stmt.query(params_from_iter(args.iter()))?;
    let mut out = Vec::new();
    while limit.is_none_or(|cap| out.len() < cap) {
        let Some(row) = rows.next()? else {
            break;
        };
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(Value::from(row.get_ref(idx)?));
        }
        out.push(Row::new(Arc::clone(&columns), values));
    }
    Ok(out)
}

impl connector::Connection for SqliteConn {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }

    async fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        limit: Option<usize>,
    ) -> Result<Vec<Row>, DriverError> {
        let sql = sql.to_string();
        let args = args.to_vec();
        self.run(move |conn| read_rows(conn, &sql, &args, limit))
            .await
    }

    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64, DriverError> {
        let sql = sql.to_string();
        let args = args.to_vec();
        self.run(move |conn| conn.execute(&sql, params_from_iter(args.iter())))
            .await
            .map(|affected| affected as u64)
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.run(|conn| conn.execute_batch("BEGIN")).await
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.run(|conn| conn.execute_batch("COMMIT")).await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.run(|conn| conn.execute_batch("ROLLBACK")).await
    }
}

/// Opens read-write connections to one database file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Connector for SqliteConnector {
    type Conn = SqliteConn;

    async fn connect(&self) -> Result<SqliteConn, DriverError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || SqliteConn::open(&path))
            .await
            .map_err(DriverError::from)?
            .map_err(DriverError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Connection as _;

    #[tokio::test]
    async fn query_caps_rows_at_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = SqliteConnector::new(dir.path().join("t.db"))
            .connect()
            .await
            .expect("connect");
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .expect("create");
        for name in ["a", "b", "c"] {
            conn.execute("INSERT INTO t (name) VALUES (?)", &[Value::from(name)])
                .await
                .expect("insert");
        }
        let rows = conn
            .query("SELECT id, name FROM t ORDER BY id", &[], Some(2))
            .await
            .expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("name"), Some(&Value::from("b")));
        assert_eq!(rows[0].columns(), ["id", "name"]);
    }

    #[tokio::test]
    async fn booleans_round_trip_as_integers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = SqliteConnector::new(dir.path().join("t.db"))
            .connect()
            .await
            .expect("connect");
        conn.execute("CREATE TABLE f (flag boolean)", &[])
            .await
            .expect("create");
        conn.execute("INSERT INTO f (flag) VALUES (?)", &[Value::Bool(true)])
            .await
            .expect("insert");
        let rows = conn.query("SELECT flag FROM f", &[], None).await.expect("query");
        assert_eq!(rows[0].get("flag"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn connections_create_and_share_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shared.db");
        let connector = SqliteConnector::new(&path);
        let mut writer = connector.connect().await.expect("connect");
        assert!(path.exists());
        writer
            .execute("CREATE TABLE t (name TEXT)", &[])
            .await
            .expect("create");
        writer
            .execute("INSERT INTO t (name) VALUES (?)", &[Value::from("a")])
            .await
            .expect("insert");
        let mut reader = connector.connect().await.expect("second connect");
        let rows = reader.query("SELECT name FROM t", &[], None).await.expect("query");
        assert_eq!(rows[0].get("name"), Some(&Value::from("a")));
    }

    #[tokio::test]
    async fn opening_a_missing_directory_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = SqliteConnector::new(dir.path().join("missing").join("t.db"))
            .connect()
            .await;
        assert!(result.is_err());
    }
}
