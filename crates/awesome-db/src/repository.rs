//! Typed CRUD over a registered entity.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connector::{AnyConnection, Connection};
use crate::entity::Entity;
use crate::error::{DbError, Result};
use crate::executor::Database;
use crate::schema::{Schema, quote_ident};
use crate::value::{Row, Value};

/// Row window for `find_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// At most `n` rows.
    Rows(u64),
    /// At most `count` rows, skipping the first `offset`.
    Range { offset: u64, count: u64 },
}

impl From<u64> for Limit {
    fn from(rows: u64) -> Self {
        Self::Rows(rows)
    }
}

impl From<(u64, u64)> for Limit {
    fn from((offset, count): (u64, u64)) -> Self {
        Self::Range { offset, count }
    }
}

impl TryFrom<&[i64]> for Limit {
    type Error = DbError;

    /// Accepts `[n]` or `[offset, count]` with non-negative entries.
    fn try_from(values: &[i64]) -> Result<Self> {
        let non_negative = |value: i64| {
            u64::try_from(value)
                .map_err(|_| DbError::InvalidArgument(format!("Invalid limit value: {value}")))
        };
        match values {
            [rows] => Ok(Self::Rows(non_negative(*rows)?)),
            [offset, count] => Ok(Self::Range {
                offset: non_negative(*offset)?,
                count: non_negative(*count)?,
            }),
            other => Err(DbError::InvalidArgument(format!(
                "Invalid limit value: {other:?}"
            ))),
        }
    }
}

fn limit_arg(value: u64) -> Result<Value> {
    i64::try_from(value)
        .map(Value::Int)
        .map_err(|_| DbError::InvalidArgument(format!("Invalid limit value: {value}")))
}

/// Filters for [`Repository::find_all`]. Fragments use `?` placeholders
/// matched positionally against `args`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub where_clause: Option<String>,
    pub args: Vec<Value>,
    pub order_by: Option<String>,
    pub limit: Option<Limit>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, clause: impl Into<String>, args: Vec<Value>) -> Self {
        self.where_clause = Some(clause.into());
        self.args = args;
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn limit(mut self, limit: impl Into<Limit>) -> Self {
        self.limit = Some(limit.into());
        self
    }
}

/// CRUD operations for one entity type, sharing one compiled [`Schema`].
pub struct Repository<E, C: Connection = AnyConnection> {
    db: Database<C>,
    schema: Arc<Schema>,
    _entity: PhantomData<fn() -> E>,
}

impl<E, C: Connection> Clone for Repository<E, C> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            schema: Arc::clone(&self.schema),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity, C: Connection> Repository<E, C> {
    /// Compiles the entity's schema. Fails on an invalid declaration.
    pub fn register(db: &Database<C>) -> Result<Self> {
        Ok(Self {
            db: db.clone(),
            schema: Arc::new(E::schema()?),
            _entity: PhantomData,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn database(&self) -> &Database<C> {
        &self.db
    }

    /// Creates the table if it does not exist.
    pub async fn create_table(&self) -> Result<()> {
        self.db
            .execute(&self.schema.create_table_sql(), &[], false)
            .await
            .map(|_| ())
    }

    fn hydrate(&self, row: &Row) -> Result<E> {
        let mut entity = E::default();
        for (column, value) in row.iter() {
            let attribute = self
                .schema
                .attribute_of(column)
                .ok_or_else(|| DbError::UnknownAttribute(column.to_string()))?;
            entity.set(attribute, value.clone())?;
        }
        Ok(entity)
    }

    fn current(entity: &E, attribute: &str) -> Result<Value> {
        Ok(entity.get(attribute)?.unwrap_or_default())
    }

    pub async fn find(&self, pk: impl Into<Value>) -> Result<Option<E>> {
        let sql = format!(
            "{} WHERE {}=?",
            self.schema.select_sql(),
            quote_ident(self.schema.primary_key_column())
        );
        let rows = self.db.query(&sql, &[pk.into()], Some(1)).await?;
        rows.first().map(|row| self.hydrate(row)).transpose()
    }

    pub async fn find_all(&self, options: FindOptions) -> Result<Vec<E>> {
        let FindOptions {
            where_clause,
            mut args,
            order_by,
            limit,
        } = options;
        let mut sql = self.schema.select_sql().to_string();
        if let Some(clause) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        if let Some(order_by) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by);
        }
        match limit {
            None => {}
            Some(Limit::Rows(rows)) => {
                sql.push_str(" LIMIT ?");
                args.push(limit_arg(rows)?);
            }
            Some(Limit::Range { offset, count }) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                args.push(limit_arg(count)?);
                args.push(limit_arg(offset)?);
            }
        }
        let rows = self.db.query(&sql, &args, None).await?;
        rows.iter().map(|row| self.hydrate(row)).collect()
    }

    /// Evaluates `expression` (for example `count(id)`) over the table.
    pub async fn count(
        &self,
        expression: &str,
        where_clause: Option<&str>,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let mut sql = format!(
            "SELECT {expression} AS count FROM {}",
            quote_ident(self.schema.table())
        );
        if let Some(clause) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        let rows = self.db.query(&sql, args, Some(1)).await?;
        Ok(rows.first().and_then(|row| row.get("count")).cloned())
    }

    /// Inserts the entity. Unset attributes take their declared defaults,
    /// which are written back into `entity`.
    pub async fn save(&self, entity: &mut E) -> Result<u64> {
        let schema = &self.schema;
        let attributes = schema
            .fields()
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(schema.primary_key()));
        let mut args = Vec::with_capacity(schema.fields().len() + 1);
        for attribute in attributes {
            let value = match entity.get(attribute)? {
                Some(value) => value,
                None => match schema.field(attribute).and_then(|f| f.resolve_default()) {
                    Some(value) => {
                        debug!("using default value for {attribute}: {value}");
                        entity.set(attribute, value.clone())?;
                        value
                    }
                    None => Value::Null,
                },
            };
            args.push(value);
        }
        let affected = self.db.execute(schema.insert_sql(), &args, false).await?;
        if affected != 1 {
            warn!("failed to insert record: affected rows: {affected}");
        }
        Ok(affected)
    }

    /// Writes the entity's current attribute values by primary key.
    pub async fn update(&self, entity: &E) -> Result<u64> {
        let mut args = Vec::with_capacity(self.schema.fields().len() + 1);
        for attribute in self.schema.fields() {
            args.push(Self::current(entity, attribute)?);
        }
        args.push(Self::current(entity, self.schema.primary_key())?);
        let affected = self
            .db
            .execute(self.schema.update_sql(), &args, false)
            .await?;
        if affected != 1 {
            warn!("failed to update by primary key: affected rows: {affected}");
        }
        Ok(affected)
    }

    /// Deletes the entity's row. The in-memory value is untouched.
    pub async fn remove(&self, entity: &E) -> Result<u64> {
        let pk = Self::current(entity, self.schema.primary_key())?;
        let affected = self
            .db
            .execute(self.schema.delete_sql(), &[pk], false)
            .await?;
        if affected != 1 {
            warn!("failed to remove by primary key: affected rows: {affected}");
        }
        Ok(affected)
    }
}
