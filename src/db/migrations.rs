//! SQLite initialization: connection options and the idempotent schema.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const MAX_CONNECTIONS: u32 = 5;
/// Concurrent sweep writers wait this long for the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the engine database and apply the schema.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    let statements = apply_schema(&pool).await?;
    info!(db_path = %db_path, statements, "Engine database ready");
    Ok(pool)
}

/// Run every statement of `schema.sql`; all of them are `IF NOT EXISTS`.
async fn apply_schema(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
    let statements: Vec<&str> = include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut tx = pool.begin().await?;
    for statement in &statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(statements.len())
}
