//! PostgreSQL pool and schema migrations.

use sqlx::{Pool, Postgres};

pub type DbPool = Pool<Postgres>;

/// Open the connection pool.
///
/// Every attendance transition holds one connection for a single short
/// transaction, so `max_connections` bounds how many transitions run at once.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Apply pending migrations embedded from `./migrations` at compile time.
///
/// Applied versions are recorded in `_sqlx_migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
