use std::time::Duration;

use anyhow::Context;
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use tracing::info;

pub async fn connection_manager(
    uri: &str,
    max_size: u32,
    min_idle: u32,
    acquire_timeout: Duration,
) -> anyhow::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(max_size)
        .min_connections(min_idle)
        .acquire_timeout(acquire_timeout)
        .connect(uri)
        .await
        .context("error while initializing the database connection pool")?;

    info!("database connection pool ready");
    Ok(pool)
}
