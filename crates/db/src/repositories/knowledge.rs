use sqlx::Row;

use parley_core::domain::agent::AgentId;
use parley_core::domain::knowledge::{KnowledgePassage, PassageId};

use super::decode::{parse_json, to_json};
use super::{KnowledgeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlKnowledgeRepository {
    pool: DbPool,
}

impl SqlKnowledgeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl KnowledgeRepository for SqlKnowledgeRepository {
    async fn passages_for_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<KnowledgePassage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, agent_id, content, embedding_json
             FROM knowledge_passage
             WHERE agent_id = ?
             ORDER BY id ASC",
        )
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let embedding = row
                    .try_get::<Option<String>, _>("embedding_json")?
                    .map(|raw| parse_json::<Vec<f32>>("embedding_json", &raw))
                    .transpose()?;
                Ok(KnowledgePassage {
                    id: PassageId(row.try_get("id")?),
                    agent_id: AgentId(row.try_get("agent_id")?),
                    content: row.try_get("content")?,
                    embedding,
                })
            })
            .collect()
    }

    async fn save_passage(&self, passage: KnowledgePassage) -> Result<(), RepositoryError> {
        let embedding =
            passage.embedding.as_ref().map(|vector| to_json("embedding_json", vector)).transpose()?;
        sqlx::query(
            "INSERT INTO knowledge_passage (id, agent_id, content, embedding_json)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                embedding_json = excluded.embedding_json",
        )
        .bind(&passage.id.0)
        .bind(&passage.agent_id.0)
        .bind(&passage.content)
        .bind(embedding)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_embedding(
        &self,
        id: &PassageId,
        embedding: Vec<f32>,
    ) -> Result<(), RepositoryError> {
        let updated = sqlx::query("UPDATE knowledge_passage SET embedding_json = ? WHERE id = ?")
            .bind(to_json("embedding_json", &embedding)?)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "knowledge passage", id: id.0.clone() });
        }
        Ok(())
    }
}
