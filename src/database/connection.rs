use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;

use crate::config::AppConfig;
use crate::errors::Result;

/// Build the connection pool once at startup. Production deployments require
/// TLS on the database link; sandbox and local runs connect in the clear.
pub async fn connect(config: &AppConfig) -> Result<PgPool> {
    let mut options = PgConnectOptions::from_str(&config.database_url)?;
    if config.is_production() {
        options = options.ssl_mode(PgSslMode::Require);
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("Connected to Postgres");
    Ok(pool)
}

/// Idempotent schema setup, safe to run on every boot.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transactions (
            transaction_id TEXT PRIMARY KEY,
            phone TEXT NOT NULL,
            amount BIGINT NOT NULL,
            status TEXT NOT NULL,
            mpesa_receipt TEXT
        )",
    )
    .execute(pool)
    .await?;

    info!("Database initialized");
    Ok(())
}
