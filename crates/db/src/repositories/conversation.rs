use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::agent::AgentId;
use parley_core::domain::contact::ContactId;
use parley_core::domain::conversation::{
    ConversationId, ConversationState, ConversationStatus, Message, MessageId, MessageMetadata,
    MessageRole,
};

use super::decode::{parse_optional_timestamp, parse_timestamp, parse_u64, to_i64};
use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_messages(&self, id: &ConversationId) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, tokens, model, created_at
             FROM message
             WHERE conversation_id = ?
             ORDER BY seq ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, agent_id, contact_id, status, last_message_at
             FROM conversation
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_raw: String = row.try_get("status")?;
        let status = ConversationStatus::parse(&status_raw).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown conversation status `{status_raw}`"))
        })?;

        Ok(Some(ConversationState {
            id: ConversationId(row.try_get("id")?),
            agent_id: AgentId(row.try_get("agent_id")?),
            contact_id: row.try_get::<Option<String>, _>("contact_id")?.map(ContactId),
            messages: self.load_messages(id).await?,
            status,
            last_message_at: parse_optional_timestamp(
                "last_message_at",
                row.try_get("last_message_at")?,
            )?,
        }))
    }

    async fn save_conversation(
        &self,
        conversation: ConversationState,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation (id, agent_id, contact_id, status, last_message_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id,
                contact_id = excluded.contact_id,
                status = excluded.status,
                last_message_at = excluded.last_message_at",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.agent_id.0)
        .bind(conversation.contact_id.as_ref().map(|id| id.0.clone()))
        .bind(conversation.status.as_str())
        .bind(conversation.last_message_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_message(&self, message: Message) -> Result<(), RepositoryError> {
        let tokens = message
            .metadata
            .as_ref()
            .map(|metadata| to_i64("tokens", metadata.tokens))
            .transpose()?;
        let model = message.metadata.as_ref().map(|metadata| metadata.model.clone());
        let created_at = message.created_at.to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE conversation SET last_message_at = ? WHERE id = ?")
            .bind(&created_at)
            .bind(&message.conversation_id.0)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "conversation",
                id: message.conversation_id.0,
            });
        }

        sqlx::query(
            "INSERT INTO message (id, conversation_id, seq, role, content, tokens, model, created_at)
             SELECT ?, ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?, ?, ?
             FROM message
             WHERE conversation_id = ?",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(tokens)
        .bind(model)
        .bind(&created_at)
        .bind(&message.conversation_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError> {
        let updated = sqlx::query("UPDATE conversation SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "conversation", id: id.0.clone() });
        }
        Ok(())
    }

    async fn link_contact(
        &self,
        id: &ConversationId,
        contact_id: &ContactId,
    ) -> Result<(), RepositoryError> {
        let updated = sqlx::query("UPDATE conversation SET contact_id = ? WHERE id = ?")
            .bind(&contact_id.0)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "conversation", id: id.0.clone() });
        }
        Ok(())
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw: String = row.try_get("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let tokens: Option<i64> = row.try_get("tokens")?;
    let model: Option<String> = row.try_get("model")?;
    let metadata = match (tokens, model) {
        (Some(tokens), Some(model)) => {
            Some(MessageMetadata { tokens: parse_u64("tokens", tokens)?, model })
        }
        _ => None,
    };

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        role,
        content: row.try_get("content")?,
        metadata,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
