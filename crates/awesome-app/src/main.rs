use std::sync::Arc;

use awesome_app::worker::{self, DEFAULT_MAX_QUEUE};
use awesome_app::{AppConfig, AppError, init_app, logging};
use awesome_db::Database;
use tracing::{error, info};

async fn run() -> Result<u64, AppError> {
    let config = AppConfig::load()?;
    logging::init(config.debug);
    let max_queue = std::env::var("AWESOME_MAX_QUEUE")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_QUEUE);

    let db = Database::connect(&config.db).await?;
    let served = match init_app(&db).await {
        Ok(router) => {
            info!("serving requests on stdio");
            worker::serve(
                Arc::new(router),
                tokio::io::stdin(),
                tokio::io::stdout(),
                max_queue,
            )
            .await
            .map_err(AppError::from)
        }
        Err(err) => Err(err),
    };
    db.close();
    served
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    match run().await {
        Ok(count) => {
            info!("served {count} requests");
            std::process::ExitCode::SUCCESS
        }
        Err(err) => {
            logging::init(false);
            error!("{err}");
            std::process::ExitCode::FAILURE
        }
    }
}
