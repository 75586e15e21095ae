use thiserror::Error;

/// Boxed error produced by a database driver.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by schema registration, the connection pool and the query layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Invalid entity declaration. Fatal at startup.
    #[error("registration error: {0}")]
    Registration(String),

    /// The pool could not open its initial connections.
    #[error("failed to initialize connection pool: {0}")]
    PoolInit(#[source] DriverError),

    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("connection lease cancelled")]
    Cancelled,

    #[error("failed to open database connection: {0}")]
    Connect(#[source] DriverError),

    /// A read statement failed in the driver.
    #[error("query failed: {0}")]
    Query(#[source] DriverError),

    /// A write statement failed in the driver.
    #[error("execute failed: {0}")]
    Exec(#[source] DriverError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("entity has no attribute `{0}`")]
    UnknownAttribute(String),

    #[error("cannot convert value for `{attribute}`: {message}")]
    Conversion { attribute: String, message: String },
}

impl DbError {
    pub(crate) fn registration(message: impl Into<String>) -> Self {
        Self::Registration(message.into())
    }

    /// `true` for errors caused by the caller's input rather than the database.
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::UnknownAttribute(_) | Self::Conversion { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
