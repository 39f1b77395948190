use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::fixtures::in_memory_database;
    use crate::{connect, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "workspace",
        "agent",
        "agent_custom_field",
        "agent_handoff_target",
        "agent_integration",
        "contact",
        "conversation",
        "message",
        "knowledge_passage",
        "usage_record",
        "idx_agent_workspace_id",
        "idx_contact_workspace_id",
        "idx_conversation_agent_id",
        "idx_message_conversation_seq",
        "idx_knowledge_passage_agent_id",
        "idx_usage_record_workspace_id",
    ];

    async fn table_exists(pool: &sqlx::SqlitePool, table: &str) -> bool {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await
        .expect("query sqlite_master")
        .get::<i64, _>("count")
            == 1
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect(&in_memory_database()).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in MANAGED_SCHEMA_OBJECTS.iter().filter(|name| !name.starts_with("idx_")) {
            assert!(table_exists(&pool, table).await, "table `{table}` should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect(&in_memory_database()).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert!(!table_exists(&pool, "conversation").await);
        assert!(!table_exists(&pool, "usage_record").await);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect(&in_memory_database()).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(
            managed_schema_signature(&pool).await.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(
            managed_schema_signature(&pool).await,
            initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
