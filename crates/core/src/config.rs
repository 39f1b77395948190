use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub handoff: HandoffConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub gemini_api_key: Option<SecretString>,
    pub gemini_base_url: String,
    pub openai_api_key: Option<SecretString>,
    pub openai_base_url: String,
    pub fallback_family: ProviderFamily,
    pub fallback_model: String,
    pub lightweight_model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub embedding_model: String,
    pub candidate_pool: usize,
    pub result_limit: usize,
    pub rerank_enabled: bool,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct HandoffConfig {
    pub enforce_contact_requirements: bool,
    pub webhook_url: Option<String>,
    pub conversation_base_url: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Model provider family. Both families speak the chat-completions wire shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }

    pub fn for_model(model: &str) -> Self {
        if model.trim().to_ascii_lowercase().starts_with("gemini") {
            Self::Gemini
        } else {
            Self::OpenAi
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub fallback_family: Option<ProviderFamily>,
    pub fallback_model: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                gemini_api_key: None,
                gemini_base_url: "https://generativelanguage.googleapis.com/v1beta/openai"
                    .to_string(),
                openai_api_key: None,
                openai_base_url: "https://api.openai.com/v1".to_string(),
                fallback_family: ProviderFamily::OpenAi,
                fallback_model: "gpt-4o-mini".to_string(),
                lightweight_model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
            },
            retrieval: RetrievalConfig {
                embedding_model: "text-embedding-3-small".to_string(),
                candidate_pool: 20,
                result_limit: 5,
                rerank_enabled: false,
                timeout_secs: 15,
            },
            handoff: HandoffConfig {
                enforce_contact_requirements: true,
                webhook_url: None,
                conversation_base_url: "http://localhost:3000/conversations".to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ProviderFamily {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::Validation(format!(
                "unsupported provider family `{other}` (expected gemini|openai)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    pub fn api_key(&self, family: ProviderFamily) -> Option<&SecretString> {
        let key = match family {
            ProviderFamily::Gemini => self.gemini_api_key.as_ref(),
            ProviderFamily::OpenAi => self.openai_api_key.as_ref(),
        };
        key.filter(|secret| !secret.expose_secret().trim().is_empty())
    }

    pub fn base_url(&self, family: ProviderFamily) -> &str {
        match family {
            ProviderFamily::Gemini => &self.gemini_base_url,
            ProviderFamily::OpenAi => &self.openai_base_url,
        }
    }

    /// Name of the setting that holds the key for `family`, for error replies.
    pub fn api_key_setting(family: ProviderFamily) -> &'static str {
        match family {
            ProviderFamily::Gemini => "llm.gemini_api_key",
            ProviderFamily::OpenAi => "llm.openai_api_key",
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(key) = llm.gemini_api_key {
                self.llm.gemini_api_key = Some(secret_value(key));
            }
            if let Some(base_url) = llm.gemini_base_url {
                self.llm.gemini_base_url = base_url;
            }
            if let Some(key) = llm.openai_api_key {
                self.llm.openai_api_key = Some(secret_value(key));
            }
            if let Some(base_url) = llm.openai_base_url {
                self.llm.openai_base_url = base_url;
            }
            if let Some(family) = llm.fallback_family {
                self.llm.fallback_family = family;
            }
            if let Some(model) = llm.fallback_model {
                self.llm.fallback_model = model;
            }
            if let Some(model) = llm.lightweight_model {
                self.llm.lightweight_model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(model) = retrieval.embedding_model {
                self.retrieval.embedding_model = model;
            }
            if let Some(pool) = retrieval.candidate_pool {
                self.retrieval.candidate_pool = pool;
            }
            if let Some(limit) = retrieval.result_limit {
                self.retrieval.result_limit = limit;
            }
            if let Some(enabled) = retrieval.rerank_enabled {
                self.retrieval.rerank_enabled = enabled;
            }
            if let Some(timeout_secs) = retrieval.timeout_secs {
                self.retrieval.timeout_secs = timeout_secs;
            }
        }

        if let Some(handoff) = patch.handoff {
            if let Some(enforce) = handoff.enforce_contact_requirements {
                self.handoff.enforce_contact_requirements = enforce;
            }
            if let Some(url) = handoff.webhook_url {
                self.handoff.webhook_url = Some(url);
            }
            if let Some(url) = handoff.conversation_base_url {
                self.handoff.conversation_base_url = url;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PARLEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PARLEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_GEMINI_API_KEY") {
            self.llm.gemini_api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_GEMINI_BASE_URL") {
            self.llm.gemini_base_url = value;
        }
        if let Some(value) = read_env("PARLEY_OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_OPENAI_BASE_URL") {
            self.llm.openai_base_url = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_FALLBACK_FAMILY") {
            self.llm.fallback_family = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_LLM_FALLBACK_MODEL") {
            self.llm.fallback_model = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_LIGHTWEIGHT_MODEL") {
            self.llm.lightweight_model = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PARLEY_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_RETRIEVAL_EMBEDDING_MODEL") {
            self.retrieval.embedding_model = value;
        }
        if let Some(value) = read_env("PARLEY_RETRIEVAL_CANDIDATE_POOL") {
            self.retrieval.candidate_pool =
                parse_u32("PARLEY_RETRIEVAL_CANDIDATE_POOL", &value)? as usize;
        }
        if let Some(value) = read_env("PARLEY_RETRIEVAL_RESULT_LIMIT") {
            self.retrieval.result_limit =
                parse_u32("PARLEY_RETRIEVAL_RESULT_LIMIT", &value)? as usize;
        }
        if let Some(value) = read_env("PARLEY_RETRIEVAL_RERANK_ENABLED") {
            self.retrieval.rerank_enabled = parse_bool("PARLEY_RETRIEVAL_RERANK_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PARLEY_RETRIEVAL_TIMEOUT_SECS") {
            self.retrieval.timeout_secs = parse_u64("PARLEY_RETRIEVAL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_HANDOFF_ENFORCE_CONTACT_REQUIREMENTS") {
            self.handoff.enforce_contact_requirements =
                parse_bool("PARLEY_HANDOFF_ENFORCE_CONTACT_REQUIREMENTS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_HANDOFF_WEBHOOK_URL") {
            self.handoff.webhook_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_HANDOFF_CONVERSATION_BASE_URL") {
            self.handoff.conversation_base_url = value;
        }

        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLEY_SERVER_PORT") {
            self.server.port = parse_u16("PARLEY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(family) = overrides.fallback_family {
            self.llm.fallback_family = family;
        }
        if let Some(model) = overrides.fallback_model {
            self.llm.fallback_model = model;
        }
        if let Some(key) = overrides.gemini_api_key {
            self.llm.gemini_api_key = Some(secret_value(key));
        }
        if let Some(key) = overrides.openai_api_key {
            self.llm.openai_api_key = Some(secret_value(key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_retrieval(&self.retrieval)?;
        validate_handoff(&self.handoff)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    for (setting, url) in
        [("llm.gemini_base_url", &llm.gemini_base_url), ("llm.openai_base_url", &llm.openai_base_url)]
    {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{setting} must start with http:// or https://"
            )));
        }
    }

    if llm.fallback_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.fallback_model must name a known-good model of the fallback family".to_string(),
        ));
    }
    if llm.lightweight_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.lightweight_model is required for query expansion and reranking".to_string(),
        ));
    }

    Ok(())
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    if retrieval.result_limit == 0 {
        return Err(ConfigError::Validation(
            "retrieval.result_limit must be greater than zero".to_string(),
        ));
    }
    if retrieval.candidate_pool < retrieval.result_limit {
        return Err(ConfigError::Validation(
            "retrieval.candidate_pool must be at least retrieval.result_limit".to_string(),
        ));
    }
    if retrieval.timeout_secs == 0 || retrieval.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "retrieval.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_handoff(handoff: &HandoffConfig) -> Result<(), ConfigError> {
    if let Some(url) = &handoff.webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "handoff.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    retrieval: Option<RetrievalPatch>,
    handoff: Option<HandoffPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    gemini_api_key: Option<String>,
    gemini_base_url: Option<String>,
    openai_api_key: Option<String>,
    openai_base_url: Option<String>,
    fallback_family: Option<ProviderFamily>,
    fallback_model: Option<String>,
    lightweight_model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    embedding_model: Option<String>,
    candidate_pool: Option<usize>,
    result_limit: Option<usize>,
    rerank_enabled: Option<bool>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct HandoffPatch {
    enforce_contact_requirements: Option<bool>,
    webhook_url: Option<String>,
    conversation_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, ProviderFamily};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn missing_path(dir: &TempDir) -> Option<std::path::PathBuf> {
        Some(dir.path().join("absent.toml"))
    }

    #[test]
    fn defaults_validate_without_any_provider_keys() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;

        let config = AppConfig::load(LoadOptions {
            config_path: missing_path(&dir),
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.retrieval.candidate_pool == 20, "candidate pool defaults to 20")?;
        ensure(config.retrieval.result_limit == 5, "result limit defaults to 5")?;
        ensure(config.handoff.enforce_contact_requirements, "guardrail is on by default")?;
        ensure(config.llm.api_key(ProviderFamily::Gemini).is_none(), "no gemini key by default")?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PARLEY_GEMINI_KEY", "gemini-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("parley.toml");
            fs::write(
                &path,
                r#"
[llm]
gemini_api_key = "${TEST_PARLEY_GEMINI_KEY}"
fallback_family = "gemini"
fallback_model = "gemini-1.5-flash"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let key = config
                .llm
                .api_key(ProviderFamily::Gemini)
                .map(|secret| secret.expose_secret().to_string());
            ensure(key.as_deref() == Some("gemini-from-env"), "gemini key comes from env")?;
            ensure(
                config.llm.fallback_family == ProviderFamily::Gemini,
                "fallback family read from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_PARLEY_GEMINI_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("PARLEY_OPENAI_API_KEY", "sk-from-env");
        env::set_var("PARLEY_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("parley.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[llm]
openai_api_key = "sk-from-file"

[retrieval]
rerank_enabled = true

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(matches!(config.logging.format, LogFormat::Json), "env log format applies")?;
            ensure(config.retrieval.rerank_enabled, "file enables reranking")?;
            let key = config
                .llm
                .api_key(ProviderFamily::OpenAi)
                .map(|secret| secret.expose_secret().to_string());
            ensure(key.as_deref() == Some("sk-from-env"), "env key should win over file")?;
            Ok(())
        })();

        clear_vars(&["PARLEY_DATABASE_URL", "PARLEY_OPENAI_API_KEY", "PARLEY_LOG_FORMAT"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_RETRIEVAL_RESULT_LIMIT", "50");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let error = match AppConfig::load(LoadOptions {
                config_path: missing_path(&dir),
                ..LoadOptions::default()
            }) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            match error {
                ConfigError::Validation(message) => ensure(
                    message.contains("candidate_pool"),
                    "message should name the offending setting",
                ),
                other => Err(format!("unexpected error {other}")),
            }
        })();

        clear_vars(&["PARLEY_RETRIEVAL_RESULT_LIMIT"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_SERVER_PORT", "eighty");
        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            match AppConfig::load(LoadOptions {
                config_path: missing_path(&dir),
                ..LoadOptions::default()
            }) {
                Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                    ensure(key == "PARLEY_SERVER_PORT", "key should be reported")
                }
                Err(other) => Err(format!("unexpected error {other}")),
                Ok(_) => Err("expected env override failure".to_string()),
            }
        })();

        clear_vars(&["PARLEY_SERVER_PORT"]);
        result
    }

    #[test]
    fn required_file_must_exist() {
        let error = AppConfig::load(LoadOptions {
            config_path: Some("/nonexistent/parley.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        })
        .expect_err("missing file");
        assert!(matches!(error, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn provider_family_is_inferred_from_model_identifier() {
        assert_eq!(ProviderFamily::for_model("gemini-1.5-flash"), ProviderFamily::Gemini);
        assert_eq!(ProviderFamily::for_model("Gemini-2.0-pro"), ProviderFamily::Gemini);
        assert_eq!(ProviderFamily::for_model("gpt-4o"), ProviderFamily::OpenAi);
    }
}
