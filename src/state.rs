use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::tokens::TokenManager;
use crate::config::AppConfig;
use crate::storage::{MediaStore, S3MediaStore};
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub storage: Arc<dyn MediaStore>,
    pub tokens: TokenManager,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;
        tracing::info!("migrations applied");

        let storage = Arc::new(S3MediaStore::new(&config.storage).await?) as Arc<dyn MediaStore>;
        let users = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;

        Ok(Self::from_parts(config, users, storage))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        storage: Arc<dyn MediaStore>,
    ) -> Self {
        let tokens = TokenManager::new(&config.jwt);
        Self {
            config,
            users,
            storage,
            tokens,
        }
    }
}
