use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::debug;

use parley_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Opens the pool described by the `[database]` section. Every connection enforces foreign
/// keys and waits up to `timeout_secs` on a locked database before failing.
pub async fn connect(database: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let timeout = Duration::from_secs(database.timeout_secs.max(1));
    let options = SqliteConnectOptions::from_str(&database.url)?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(timeout);
    let max_connections = database.max_connections.max(1);

    debug!(
        event_name = "system.db.connecting",
        max_connections,
        timeout_secs = timeout.as_secs(),
        "opening sqlite pool"
    );
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(timeout)
        .connect_with(options)
        .await
}
