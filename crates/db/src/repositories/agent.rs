use sqlx::{sqlite::SqliteRow, Row};
use tracing::warn;

use parley_core::domain::agent::{
    AgentConfig, AgentId, BehaviorFlags, CommunicationStyle, CustomFieldDefinition, FieldType,
    HandoffTarget, Integration, Workspace, WorkspaceId,
};

use super::decode::{parse_json, to_json};
use super::{AgentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_custom_fields(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<CustomFieldDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT field_key, label, description, field_type, options_json
             FROM agent_custom_field
             WHERE agent_id = ?
             ORDER BY position ASC",
        )
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let options_json: String = row.try_get("options_json")?;
                Ok(CustomFieldDefinition {
                    key: row.try_get("field_key")?,
                    label: row.try_get("label")?,
                    description: row.try_get("description")?,
                    field_type: FieldType::parse(&row.try_get::<String, _>("field_type")?),
                    options: parse_json("options_json", &options_json)?,
                })
            })
            .collect()
    }

    async fn load_handoff_targets(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<HandoffTarget>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, email, description
             FROM agent_handoff_target
             WHERE agent_id = ?
             ORDER BY position ASC",
        )
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(HandoffTarget {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }

    async fn load_integrations(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<Integration>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT provider, config_json
             FROM agent_integration
             WHERE agent_id = ? AND enabled = 1
             ORDER BY provider ASC",
        )
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut integrations = Vec::with_capacity(rows.len());
        for row in rows {
            let provider: String = row.try_get("provider")?;
            let config_json: String = row.try_get("config_json")?;
            let parsed = serde_json::from_str(&config_json)
                .map_err(|error| error.to_string())
                .and_then(|config| {
                    Integration::from_raw(&provider, &config).map_err(|error| error.to_string())
                });
            match parsed {
                Ok(integration) => integrations.push(integration),
                Err(error) => warn!(
                    event_name = "db.agent.integration_skipped",
                    agent_id = %agent_id.0,
                    provider = %provider,
                    error = %error,
                    "skipping invalid integration row"
                ),
            }
        }
        Ok(integrations)
    }
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn find_agent(&self, id: &AgentId) -> Result<Option<AgentConfig>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                workspace_id,
                name,
                company_name,
                persona_prompt,
                style,
                model,
                temperature,
                timezone,
                allow_emojis,
                sign_messages,
                restrict_topics,
                split_long_messages,
                transfer_to_human,
                smart_retrieval,
                legacy_handoff_email
             FROM agent
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut agent = agent_from_row(row)?;
        agent.custom_fields = self.load_custom_fields(id).await?;
        agent.handoff_targets = self.load_handoff_targets(id).await?;
        agent.integrations = self.load_integrations(id).await?;
        Ok(Some(agent))
    }

    async fn find_workspace(
        &self,
        id: &WorkspaceId,
    ) -> Result<Option<Workspace>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, owner_email, credit_balance FROM workspace WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Workspace {
                id: WorkspaceId(row.try_get("id")?),
                name: row.try_get("name")?,
                owner_email: row.try_get("owner_email")?,
                credit_balance: row.try_get("credit_balance")?,
            })
        })
        .transpose()
    }

    async fn save_workspace(&self, workspace: Workspace) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workspace (id, name, owner_email, credit_balance)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner_email = excluded.owner_email,
                credit_balance = excluded.credit_balance",
        )
        .bind(&workspace.id.0)
        .bind(&workspace.name)
        .bind(&workspace.owner_email)
        .bind(workspace.credit_balance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_agent(&self, agent: AgentConfig) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO agent (
                id,
                workspace_id,
                name,
                company_name,
                persona_prompt,
                style,
                model,
                temperature,
                timezone,
                allow_emojis,
                sign_messages,
                restrict_topics,
                split_long_messages,
                transfer_to_human,
                smart_retrieval,
                legacy_handoff_email
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                workspace_id = excluded.workspace_id,
                name = excluded.name,
                company_name = excluded.company_name,
                persona_prompt = excluded.persona_prompt,
                style = excluded.style,
                model = excluded.model,
                temperature = excluded.temperature,
                timezone = excluded.timezone,
                allow_emojis = excluded.allow_emojis,
                sign_messages = excluded.sign_messages,
                restrict_topics = excluded.restrict_topics,
                split_long_messages = excluded.split_long_messages,
                transfer_to_human = excluded.transfer_to_human,
                smart_retrieval = excluded.smart_retrieval,
                legacy_handoff_email = excluded.legacy_handoff_email",
        )
        .bind(&agent.id.0)
        .bind(&agent.workspace_id.0)
        .bind(&agent.name)
        .bind(&agent.company_name)
        .bind(&agent.persona_prompt)
        .bind(agent.style.as_str())
        .bind(&agent.model)
        .bind(f64::from(agent.temperature))
        .bind(&agent.timezone)
        .bind(agent.flags.allow_emojis)
        .bind(agent.flags.sign_messages)
        .bind(agent.flags.restrict_topics)
        .bind(agent.flags.split_long_messages)
        .bind(agent.flags.transfer_to_human)
        .bind(agent.flags.smart_retrieval)
        .bind(&agent.legacy_handoff_email)
        .execute(&mut *tx)
        .await?;

        for table in ["agent_custom_field", "agent_handoff_target", "agent_integration"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE agent_id = ?"))
                .bind(&agent.id.0)
                .execute(&mut *tx)
                .await?;
        }

        for (position, field) in agent.custom_fields.iter().enumerate() {
            sqlx::query(
                "INSERT INTO agent_custom_field
                    (agent_id, position, field_key, label, description, field_type, options_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&agent.id.0)
            .bind(position as i64)
            .bind(&field.key)
            .bind(&field.label)
            .bind(&field.description)
            .bind(field.field_type.as_str())
            .bind(to_json("options_json", &field.options)?)
            .execute(&mut *tx)
            .await?;
        }

        for (position, target) in agent.handoff_targets.iter().enumerate() {
            sqlx::query(
                "INSERT INTO agent_handoff_target (id, agent_id, position, name, email, description)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&target.id)
            .bind(&agent.id.0)
            .bind(position as i64)
            .bind(&target.name)
            .bind(&target.email)
            .bind(&target.description)
            .execute(&mut *tx)
            .await?;
        }

        for integration in &agent.integrations {
            let config = match integration {
                Integration::GoogleCalendar(config) => to_json("config_json", config)?,
                Integration::Shopify(config) => to_json("config_json", config)?,
            };
            sqlx::query(
                "INSERT INTO agent_integration (agent_id, provider, config_json, enabled)
                 VALUES (?, ?, ?, 1)",
            )
            .bind(&agent.id.0)
            .bind(integration.provider())
            .bind(config)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn custom_field_keys_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT field.field_key
             FROM agent_custom_field AS field
             JOIN agent ON agent.id = field.agent_id
             WHERE agent.workspace_id = ?
             ORDER BY field.field_key ASC",
        )
        .bind(&workspace_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("field_key").map_err(RepositoryError::from))
            .collect()
    }
}

fn agent_from_row(row: SqliteRow) -> Result<AgentConfig, RepositoryError> {
    let style_raw: String = row.try_get("style")?;
    let style = style_raw.parse::<CommunicationStyle>().map_err(|error| {
        RepositoryError::Decode(format!("invalid agent style: {error}"))
    })?;
    let temperature: f64 = row.try_get("temperature")?;

    Ok(AgentConfig {
        id: AgentId(row.try_get("id")?),
        workspace_id: WorkspaceId(row.try_get("workspace_id")?),
        name: row.try_get("name")?,
        company_name: row.try_get("company_name")?,
        persona_prompt: row.try_get("persona_prompt")?,
        style,
        model: row.try_get("model")?,
        temperature: temperature as f32,
        timezone: row.try_get("timezone")?,
        flags: BehaviorFlags {
            allow_emojis: row.try_get("allow_emojis")?,
            sign_messages: row.try_get("sign_messages")?,
            restrict_topics: row.try_get("restrict_topics")?,
            split_long_messages: row.try_get("split_long_messages")?,
            transfer_to_human: row.try_get("transfer_to_human")?,
            smart_retrieval: row.try_get("smart_retrieval")?,
        },
        custom_fields: Vec::new(),
        handoff_targets: Vec::new(),
        legacy_handoff_email: row.try_get("legacy_handoff_email")?,
        integrations: Vec::new(),
    })
}
