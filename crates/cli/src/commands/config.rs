use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use toml::Value;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());
    let entries: Vec<ConfigEntry> = effective_values(&config)
        .into_iter()
        .map(|(key, env_key, value)| ConfigEntry {
            key,
            value,
            source: field_source(key, env_key, file_doc.as_ref(), file_path.as_deref()),
        })
        .collect();

    CommandResult::success_with(
        "config",
        "effective config (source precedence: env > file > default)",
        serde_json::to_value(entries).ok(),
    )
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, &'static str, String)> {
    let llm = &config.llm;
    let retrieval = &config.retrieval;
    let handoff = &config.handoff;
    vec![
        ("database.url", "PARLEY_DATABASE_URL", config.database.url.clone()),
        (
            "database.max_connections",
            "PARLEY_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        (
            "database.timeout_secs",
            "PARLEY_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        ("llm.gemini_api_key", "PARLEY_GEMINI_API_KEY", redact_secret(llm.gemini_api_key.as_ref())),
        ("llm.gemini_base_url", "PARLEY_GEMINI_BASE_URL", llm.gemini_base_url.clone()),
        ("llm.openai_api_key", "PARLEY_OPENAI_API_KEY", redact_secret(llm.openai_api_key.as_ref())),
        ("llm.openai_base_url", "PARLEY_OPENAI_BASE_URL", llm.openai_base_url.clone()),
        ("llm.fallback_family", "PARLEY_LLM_FALLBACK_FAMILY", llm.fallback_family.as_str().to_string()),
        ("llm.fallback_model", "PARLEY_LLM_FALLBACK_MODEL", llm.fallback_model.clone()),
        ("llm.lightweight_model", "PARLEY_LLM_LIGHTWEIGHT_MODEL", llm.lightweight_model.clone()),
        ("llm.timeout_secs", "PARLEY_LLM_TIMEOUT_SECS", llm.timeout_secs.to_string()),
        (
            "retrieval.embedding_model",
            "PARLEY_RETRIEVAL_EMBEDDING_MODEL",
            retrieval.embedding_model.clone(),
        ),
        (
            "retrieval.candidate_pool",
            "PARLEY_RETRIEVAL_CANDIDATE_POOL",
            retrieval.candidate_pool.to_string(),
        ),
        ("retrieval.result_limit", "PARLEY_RETRIEVAL_RESULT_LIMIT", retrieval.result_limit.to_string()),
        (
            "retrieval.rerank_enabled",
            "PARLEY_RETRIEVAL_RERANK_ENABLED",
            retrieval.rerank_enabled.to_string(),
        ),
        ("retrieval.timeout_secs", "PARLEY_RETRIEVAL_TIMEOUT_SECS", retrieval.timeout_secs.to_string()),
        (
            "handoff.enforce_contact_requirements",
            "PARLEY_HANDOFF_ENFORCE_CONTACT_REQUIREMENTS",
            handoff.enforce_contact_requirements.to_string(),
        ),
        (
            "handoff.webhook_url",
            "PARLEY_HANDOFF_WEBHOOK_URL",
            handoff.webhook_url.as_deref().map(redact_url).unwrap_or_else(|| "<unset>".to_string()),
        ),
        (
            "handoff.conversation_base_url",
            "PARLEY_HANDOFF_CONVERSATION_BASE_URL",
            handoff.conversation_base_url.clone(),
        ),
        ("server.bind_address", "PARLEY_SERVER_BIND_ADDRESS", config.server.bind_address.clone()),
        ("server.port", "PARLEY_SERVER_PORT", config.server.port.to_string()),
        (
            "server.graceful_shutdown_secs",
            "PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        ("logging.level", "PARLEY_LOGGING_LEVEL", config.logging.level.clone()),
        ("logging.format", "PARLEY_LOGGING_FORMAT", format!("{:?}", config.logging.format).to_lowercase()),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = file_doc {
        if contains_path(doc, key_path) {
            let file_path = file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim().len()) {
        None | Some(0) => "<unset>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}

/// Webhook URLs often carry a token in the query string.
fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{contains_path, redact_secret, redact_url};

    #[test]
    fn secrets_never_render_their_value() {
        let key = SecretString::from("sk-live-123".to_string());
        assert_eq!(redact_secret(Some(&key)), "<redacted>");
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(redact_url("https://hooks.test/mail?token=abc"), "https://hooks.test/mail?<redacted>");
    }

    #[test]
    fn nested_keys_are_found_in_the_file() {
        let doc: toml::Value = "[llm]\nfallback_model = \"gpt-4o\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "llm.fallback_model"));
        assert!(!contains_path(&doc, "llm.lightweight_model"));
    }
}
