use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::config::HarnessConfig;

/// Runs migrations for the coordination state database.
pub async fn run(cfg: &HarnessConfig) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.state_database_url)
        .await
        .context("connect state db")?;

    sqlx::migrate!("../migrations/state")
        .run(&pool)
        .await
        .context("migrate state db")?;

    tracing::info!(event = "meshqueue.migrate.complete", "migrations complete");
    Ok(())
}
