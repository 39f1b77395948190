use sqlx::Row;

use parley_core::domain::agent::{AgentId, WorkspaceId};
use parley_core::domain::conversation::ConversationId;
use parley_core::domain::usage::UsageRecord;

use super::decode::{parse_timestamp, parse_u64, to_i64};
use super::{RepositoryError, UsageRepository};
use crate::DbPool;

pub struct SqlUsageRepository {
    pool: DbPool,
}

impl SqlUsageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UsageRepository for SqlUsageRepository {
    async fn record_usage(&self, record: UsageRecord) -> Result<i64, RepositoryError> {
        let credits = to_i64("credits_used", record.credits_used)?;
        let mut tx = self.pool.begin().await?;

        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE workspace SET credit_balance = credit_balance - ? WHERE id = ?
             RETURNING credit_balance",
        )
        .bind(credits)
        .bind(&record.workspace_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = balance else {
            return Err(RepositoryError::NotFound {
                entity: "workspace",
                id: record.workspace_id.0,
            });
        };

        sqlx::query(
            "INSERT INTO usage_record (
                id, workspace_id, agent_id, conversation_id, tokens_used, credits_used, model, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.workspace_id.0)
        .bind(&record.agent_id.0)
        .bind(&record.conversation_id.0)
        .bind(to_i64("tokens_used", record.tokens_used)?)
        .bind(credits)
        .bind(&record.model)
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(balance)
    }

    async fn usage_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<UsageRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, agent_id, conversation_id, tokens_used, credits_used, model, created_at
             FROM usage_record
             WHERE conversation_id = ?
             ORDER BY created_at ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(UsageRecord {
                    id: row.try_get("id")?,
                    workspace_id: WorkspaceId(row.try_get("workspace_id")?),
                    agent_id: AgentId(row.try_get("agent_id")?),
                    conversation_id: ConversationId(row.try_get("conversation_id")?),
                    tokens_used: parse_u64("tokens_used", row.try_get("tokens_used")?)?,
                    credits_used: parse_u64("credits_used", row.try_get("credits_used")?)?,
                    model: row.try_get("model")?,
                    created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
                })
            })
            .collect()
    }
}
