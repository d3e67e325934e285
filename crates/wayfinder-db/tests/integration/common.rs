use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use wayfinder_db::ServiceRepository;

const DB_NAME: &str = "wayfinder_test";

/// The same scripts `Database::migrate` embeds, applied in order.
const MIGRATIONS: &[&str] = &[
    include_str!("../../../../migrations/001_services.sql"),
    include_str!("../../../../migrations/002_duplicate_pairs.sql"),
];

/// A throwaway PostgreSQL with the schema applied. Dropping the container
/// stops it, so hold on to it for the whole test.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", DB_NAME)
        .start()
        .await
        .expect("postgres container should start");

    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("mapped postgres port");

    let pool = connect_with_retry(&format!(
        "postgresql://postgres:postgres@{host}:{port}/{DB_NAME}"
    ))
    .await;

    for script in MIGRATIONS {
        sqlx::raw_sql(script)
            .execute(&pool)
            .await
            .expect("migration should apply");
    }

    (pool, container)
}

pub async fn setup_repo() -> (ServiceRepository, ContainerAsync<GenericImage>) {
    let (pool, container) = setup_test_db().await;
    (ServiceRepository::new(pool), container)
}

/// Postgres logs "ready" once before its init restart, so the first
/// connection attempts can still be refused.
async fn connect_with_retry(url: &str) -> PgPool {
    let mut last_error = None;
    for _ in 0..30 {
        match PgPoolOptions::new().max_connections(5).connect(url).await {
            Ok(pool) => return pool,
            Err(e) => {
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    panic!("could not connect to test database: {last_error:?}");
}
