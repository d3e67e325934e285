use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use wayfinder_core::AppError;

use crate::config::DatabaseConfig;
use crate::repository::ServiceRepository;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection pool plus the schema that goes with it.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::debug!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Connect using `DATABASE_URL` and bring the schema up to date.
    pub async fn open_from_env() -> Result<Self, AppError> {
        let db = Self::connect(&DatabaseConfig::from_env()?).await?;
        db.migrate().await?;
        Ok(db)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the `services` and `duplicate_pairs` migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))
    }

    pub fn service_repo(&self) -> ServiceRepository {
        ServiceRepository::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
