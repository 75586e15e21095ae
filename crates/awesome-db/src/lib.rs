//! Declarative entity mapping over a pooled async database connection.
//!
//! Entities are declared with [`entity!`], compiled once into a [`Schema`]
//! when a [`Repository`] is registered, and executed through a [`Database`]
//! handle that owns the connection pool.

pub mod config;
pub mod connector;
pub mod entity;
pub mod error;
pub mod executor;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod schema;
pub mod sqlite;
pub mod value;

pub use config::{Backend, PoolConfig};
pub use connector::{AnyConnection, AnyConnector, Connection, Connector, PlaceholderStyle};
pub use entity::Entity;
pub use error::{DbError, DriverError, Result};
pub use executor::{Database, PoolStats};
pub use pool::{AcquireError, AsyncPool, CancelToken, Lease};
pub use repository::{FindOptions, Limit, Repository};
pub use schema::{ColumnType, DefaultValue, Field, Schema};
pub use value::{FromValue, Row, Value};
