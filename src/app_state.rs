use crate::{config::Config, database::Database};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let database = Database::new(&config.database.url, config.cache.capacity).await?;
        database.init().await?;

        Ok(Self {
            db: Arc::new(database),
            config,
        })
    }

    /// State over an already-initialized database. Used by tests.
    pub fn with_database(db: Arc<Database>, config: Config) -> Self {
        Self { db, config }
    }
}
