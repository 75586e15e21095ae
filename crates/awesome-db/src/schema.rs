//! Field declarations and the SQL compiled from them.
//!
//! A [`Schema`] is built once per entity type from an ordered list of
//! `(attribute, Field)` pairs and is immutable afterwards. The four canonical
//! statements use `?` placeholders; the executor rewrites them into the
//! driver's native syntax.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{DbError, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Boolean,
    Integer,
    Float,
    Text,
}

impl ColumnType {
    fn default_ddl(self) -> &'static str {
        match self {
            Self::String => "varchar(100)",
            Self::Boolean => "boolean",
            Self::Integer => "bigint",
            Self::Float => "double precision",
            Self::Text => "text",
        }
    }
}

/// Default applied by `save` when an attribute is unset.
#[derive(Clone, Default)]
pub enum DefaultValue {
    #[default]
    None,
    Value(Value),
    /// Invoked lazily, once per save that needs it.
    Generator(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// One mapped column.
#[derive(Debug, Clone)]
pub struct Field {
    column: Option<String>,
    column_type: ColumnType,
    ddl: Cow<'static, str>,
    primary_key: bool,
    default: DefaultValue,
}

impl Field {
    fn new(column_type: ColumnType, default: DefaultValue) -> Self {
        Self {
            column: None,
            column_type,
            ddl: Cow::Borrowed(column_type.default_ddl()),
            primary_key: false,
            default,
        }
    }

    pub fn string() -> Self {
        Self::new(ColumnType::String, DefaultValue::None)
    }

    pub fn boolean() -> Self {
        Self::new(ColumnType::Boolean, DefaultValue::Value(Value::Bool(false)))
    }

    pub fn integer() -> Self {
        Self::new(ColumnType::Integer, DefaultValue::Value(Value::Int(0)))
    }

    pub fn float() -> Self {
        Self::new(ColumnType::Float, DefaultValue::Value(Value::Float(0.0)))
    }

    pub fn text() -> Self {
        Self::new(ColumnType::Text, DefaultValue::None)
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Column name when it differs from the attribute name.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column = Some(name.into());
        self
    }

    pub fn ddl(mut self, ddl: impl Into<Cow<'static, str>>) -> Self {
        self.ddl = ddl.into();
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = DefaultValue::Value(value.into());
        self
    }

    pub fn default_with<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = DefaultValue::Generator(Arc::new(generator));
        self
    }

    pub fn no_default(mut self) -> Self {
        self.default = DefaultValue::None;
        self
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn ddl_type(&self) -> &str {
        &self.ddl
    }

    pub fn declared_default(&self) -> &DefaultValue {
        &self.default
    }

    /// Produces the default value, calling the generator if there is one.
    pub fn resolve_default(&self) -> Option<Value> {
        match &self.default {
            DefaultValue::None => None,
            DefaultValue::Value(value) => Some(value.clone()),
            DefaultValue::Generator(generate) => Some(generate()),
        }
    }
}

/// Quotes an identifier with ANSI double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone)]
struct Mapping {
    attribute: String,
    column: String,
    field: Field,
}

/// Compiled, immutable description of one entity type.
#[derive(Debug, Clone)]
pub struct Schema {
    table: String,
    mappings: Vec<Mapping>,
    primary_key: usize,
    fields: Vec<String>,
    select: String,
    insert: String,
    update: String,
    delete: String,
}

impl Schema {
    pub fn build<I, S>(table: impl Into<String>, declarations: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Field)>,
        S: Into<String>,
    {
        let table = table.into();
        if table.trim().is_empty() {
            return Err(DbError::registration("table name must not be empty"));
        }
        debug!("found model: {table}");

        let mut mappings = Vec::new();
        let mut seen = HashSet::new();
        let mut columns = HashSet::new();
        let mut primary_key = None;
        for (attribute, field) in declarations {
            let attribute = attribute.into();
            if !seen.insert(attribute.clone()) {
                return Err(DbError::registration(format!(
                    "duplicate attribute `{attribute}` in table `{table}`"
                )));
            }
            if field.primary_key {
                if primary_key.is_some() {
                    return Err(DbError::registration(format!(
                        "duplicate primary key for field: {attribute}"
                    )));
                }
                if matches!(field.column_type, ColumnType::Boolean | ColumnType::Text) {
                    return Err(DbError::registration(format!(
                        "{:?} field `{attribute}` cannot be a primary key",
                        field.column_type
                    )));
                }
                primary_key = Some(mappings.len());
            }
            let column = field.column.clone().unwrap_or_else(|| attribute.clone());
            if !columns.insert(column.clone()) {
                return Err(DbError::registration(format!(
                    "attribute `{attribute}` maps to column `{column}` already used in table `{table}`"
                )));
            }
            debug!("  found mapping: {attribute} ==> {column} ({})", field.ddl);
            mappings.push(Mapping {
                attribute,
                column,
                field,
            });
        }

        let primary_key = primary_key.ok_or_else(|| {
            DbError::registration(format!("primary key not found in table `{table}`"))
        })?;
        let fields: Vec<String> = mappings
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != primary_key)
            .map(|(_, mapping)| mapping.attribute.clone())
            .collect();
        if fields.is_empty() {
            return Err(DbError::registration(format!(
                "table `{table}` declares no columns besides its primary key"
            )));
        }

        let mut schema = Self {
            table,
            mappings,
            primary_key,
            fields,
            select: String::new(),
            insert: String::new(),
            update: String::new(),
            delete: String::new(),
        };
        schema.compile();
        Ok(schema)
    }

    fn compile(&mut self) {
        let table = quote_ident(&self.table);
        let pk = quote_ident(&self.mappings[self.primary_key].column);
        let columns: Vec<String> = self
            .fields
            .iter()
            .map(|attr| quote_ident(self.column_of(attr).unwrap_or(attr)))
            .collect();
        let placeholders = vec!["?"; columns.len() + 1].join(", ");
        let assignments: Vec<String> = columns.iter().map(|col| format!("{col}=?")).collect();

        self.select = format!("SELECT {pk}, {} FROM {table}", columns.join(", "));
        self.insert = format!(
            "INSERT INTO {table} ({}, {pk}) VALUES ({placeholders})",
            columns.join(", ")
        );
        self.update = format!(
            "UPDATE {table} SET {} WHERE {pk}=?",
            assignments.join(", ")
        );
        self.delete = format!("DELETE FROM {table} WHERE {pk}=?");
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Primary-key attribute name.
    pub fn primary_key(&self) -> &str {
        &self.mappings[self.primary_key].attribute
    }

    pub fn primary_key_column(&self) -> &str {
        &self.mappings[self.primary_key].column
    }

    /// Non-key attribute names, in declaration order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field(&self, attribute: &str) -> Option<&Field> {
        self.mappings
            .iter()
            .find(|mapping| mapping.attribute == attribute)
            .map(|mapping| &mapping.field)
    }

    pub fn column_of(&self, attribute: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|mapping| mapping.attribute == attribute)
            .map(|mapping| mapping.column.as_str())
    }

    pub fn attribute_of(&self, column: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|mapping| mapping.column == column)
            .map(|mapping| mapping.attribute.as_str())
    }

    /// `(attribute, field)` pairs in declaration order.
    pub fn mappings(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.mappings
            .iter()
            .map(|mapping| (mapping.attribute.as_str(), &mapping.field))
    }

    pub fn select_sql(&self) -> &str {
        &self.select
    }

    pub fn insert_sql(&self) -> &str {
        &self.insert
    }

    pub fn update_sql(&self) -> &str {
        &self.update
    }

    pub fn delete_sql(&self) -> &str {
        &self.delete
    }

    pub fn create_table_sql(&self) -> String {
        let mut columns: Vec<String> = self
            .mappings
            .iter()
            .map(|mapping| {
                let mut column = format!("{} {}", quote_ident(&mapping.column), mapping.field.ddl);
                if mapping.field.primary_key {
                    column.push_str(" NOT NULL");
                }
                column
            })
            .collect();
        columns.push(format!(
            "PRIMARY KEY ({})",
            quote_ident(self.primary_key_column())
        ));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table),
            columns.join(", ")
        )
    }
}
