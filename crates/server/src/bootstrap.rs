use std::sync::Arc;
use std::time::Duration;

use parley_agent::connectors::{ConnectorError, HttpConnectorFactory};
use parley_agent::notifier::HandoffNotifier;
use parley_agent::providers::ProviderRegistry;
use parley_agent::retrieval::{RetrievalPipeline, RetrievalSettings};
use parley_agent::runtime::{AgentRuntime, RuntimeSettings};
use parley_agent::tools::ToolServices;
use parley_agent::ProviderError;
use parley_core::audit::{AuditEvent, AuditSink};
use parley_core::config::{AppConfig, ConfigError, LoadOptions, ProviderFamily};
use parley_db::repositories::{
    AgentRepository, ConversationRepository, SqlAgentRepository, SqlContactRepository,
    SqlConversationRepository, SqlKnowledgeRepository, SqlUsageRepository,
};
use parley_db::{connect, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;
use crate::notify::{LogHandoffNotifier, WebhookHandoffNotifier};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub providers: Vec<ProviderFamily>,
}

impl Application {
    pub fn api_state(&self) -> ApiState {
        ApiState { runtime: self.runtime.clone() }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model provider setup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("connector setup failed: {0}")]
    Connector(#[from] ConnectorError),
    #[error("handoff notifier setup failed: {0}")]
    Notifier(String),
}

/// Forwards audit events to the log stream.
struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            conversation_id = event.conversation_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-"),
            correlation_id = %event.correlation_id,
            actor = %event.actor,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

#[allow(dead_code)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let registry = ProviderRegistry::from_config(&config.llm, &config.retrieval)?;
    let providers = registry.families();
    info!(
        event_name = "system.bootstrap.providers_ready",
        correlation_id = "bootstrap",
        families = ?providers,
        embeddings = registry.embedder().is_some(),
        "model providers registered"
    );

    let agents: Arc<dyn AgentRepository> = Arc::new(SqlAgentRepository::new(db_pool.clone()));
    let conversations: Arc<dyn ConversationRepository> =
        Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let http_timeout = Duration::from_secs(config.llm.timeout_secs.max(1));
    let notifier: Arc<dyn HandoffNotifier> = match config.handoff.webhook_url.as_deref() {
        Some(url) => Arc::new(
            WebhookHandoffNotifier::new(url, http_timeout)
                .map_err(|error| BootstrapError::Notifier(error.to_string()))?,
        ),
        None => Arc::new(LogHandoffNotifier),
    };

    let tools = ToolServices {
        agents: agents.clone(),
        contacts: Arc::new(SqlContactRepository::new(db_pool.clone())),
        conversations: conversations.clone(),
        notifier,
        connectors: Arc::new(HttpConnectorFactory::new(http_timeout)?),
        audit: Arc::new(TracingAuditSink),
        enforce_contact_requirements: config.handoff.enforce_contact_requirements,
        conversation_base_url: config.handoff.conversation_base_url.clone(),
    };
    let retrieval = RetrievalPipeline::new(
        Arc::new(SqlKnowledgeRepository::new(db_pool.clone())),
        registry.clone(),
        RetrievalSettings::from_config(&config),
    );
    let runtime = AgentRuntime::new(
        agents,
        conversations,
        Arc::new(SqlUsageRepository::new(db_pool.clone())),
        registry,
        retrieval,
        tools,
        RuntimeSettings::from_config(&config),
    );

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        "application bootstrap complete"
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime), providers })
}

#[cfg(test)]
mod tests {
    use parley_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/parley".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_without_model_keys_still_starts_and_migrates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("parley.db").display());
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(url),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed without provider keys");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('agent', 'conversation', 'message', 'usage_record')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema should be queryable");
        assert_eq!(table_count, 4);

        app.db_pool.close().await;
    }
}
