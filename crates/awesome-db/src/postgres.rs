//! Async Postgres connector.

use std::error::Error;

use bytes::BytesMut;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, Config, NoTls};
use tracing::error;

use crate::config::PoolConfig;
use crate::connector::{Connection, Connector, PlaceholderStyle};
use crate::error::DriverError;
use crate::value::{Row, Value};

/// Connection parameters in the driver's own shape.
#[derive(Clone)]
pub struct PgConnector {
    config: Config,
}

impl PgConnector {
    pub fn new(pool: &PoolConfig) -> Self {
        let mut config = Config::new();
        config
            .host(&pool.host)
            .port(pool.port)
            .user(&pool.user)
            .password(&pool.password)
            .dbname(&pool.db)
            .connect_timeout(pool.connect_timeout())
            .options(format!("-c client_encoding={}", client_encoding(&pool.charset)));
        Self { config }
    }
}

/// Maps MySQL-style charset names onto Postgres encodings.
fn client_encoding(charset: &str) -> String {
    match charset.to_ascii_lowercase().as_str() {
        "utf8" | "utf8mb4" | "utf-8" => "UTF8".to_string(),
        "latin1" => "LATIN1".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

impl Connector for PgConnector {
    type Conn = PgConn;

    async fn connect(&self) -> Result<PgConn, DriverError> {
        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("Postgres connection error: {err}");
            }
        });
        Ok(PgConn { client })
    }
}

pub struct PgConn {
    client: Client,
}

fn params(args: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    args.iter().map(|arg| arg as &(dyn ToSql + Sync)).collect()
}

fn read_value(row: &tokio_postgres::Row, idx: usize) -> Result<Value, tokio_postgres::Error> {
    let ty = row.columns()[idx].type_();
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.map(|v| Value::Int(i64::from(v)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.map(|v| Value::Int(i64::from(v)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(Value::Int)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.map(|v| Value::Float(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(Value::Float)
    } else {
        row.try_get::<_, Option<String>>(idx)?.map(Value::Text)
    };
    Ok(value.unwrap_or(Value::Null))
}

impl Connection for PgConn {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered
    }

    async fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        limit: Option<usize>,
    ) -> Result<Vec<Row>, DriverError> {
        let rows = self.client.query(sql, &params(args)).await?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns: std::sync::Arc<[String]> = first
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();
        let take = limit.unwrap_or(rows.len());
        let mut out = Vec::with_capacity(take.min(rows.len()));
        for row in rows.iter().take(take) {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(read_value(row, idx)?);
            }
            out.push(Row::new(std::sync::Arc::clone(&columns), values));
        }
        Ok(out)
    }

    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64, DriverError> {
        Ok(self.client.execute(sql, &params(args)).await?)
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        Ok(self.client.batch_execute("BEGIN").await?)
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        Ok(self.client.batch_execute("COMMIT").await?)
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        Ok(self.client.batch_execute("ROLLBACK").await?)
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*v != 0).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Text(v) => v.to_sql(ty, out),
        }
    }

    // Type checking is deferred to the concrete `to_sql` above.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_names_map_to_encodings() {
        assert_eq!(client_encoding("utf8"), "UTF8");
        assert_eq!(client_encoding("UTF8MB4"), "UTF8");
        assert_eq!(client_encoding("latin1"), "LATIN1");
        assert_eq!(client_encoding("sql_ascii"), "SQL_ASCII");
    }

    #[test]
    fn connector_carries_pool_parameters() {
        let mut pool = PoolConfig::new("www-data", "secret", "awesome");
        pool.port = 5432;
        let connector = PgConnector::new(&pool);
        assert_eq!(connector.config.get_dbname(), Some("awesome"));
        assert_eq!(connector.config.get_user(), Some("www-data"));
        assert_eq!(connector.config.get_ports(), &[5432]);
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_connect() {
        let mut pool = PoolConfig::new("nobody", "nothing", "none");
        pool.host = "127.0.0.1".to_string();
        pool.port = 1;
        pool.connect_timeout_ms = 200;
        let result = PgConnector::new(&pool).connect().await;
        assert!(result.is_err());
    }
}
