//! Blog application wired through `awesome-db` and `awesome-web`.

pub mod api;
pub mod config;
pub mod logging;
pub mod models;
pub mod worker;

use std::sync::Arc;

use awesome_db::{Database, DbError};
use awesome_web::{RegistrationError, Router};
use thiserror::Error;

pub use api::AppState;
pub use config::{AppConfig, ConfigError};
pub use models::{Blog, Comment, User, next_id, now};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Routes(#[from] RegistrationError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Registers the entities, creates missing tables and builds the router.
pub async fn init_app(db: &Database) -> Result<Router, AppError> {
    let state = Arc::new(AppState::register(db)?);
    state.create_tables().await?;
    let mut router = Router::new();
    router.add_routes(api::endpoints(&state))?;
    Ok(router)
}
