use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommunicationStyle {
    Formal,
    #[default]
    Normal,
    Casual,
}

impl CommunicationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Formal => "FORMAL",
            Self::Normal => "NORMAL",
            Self::Casual => "CASUAL",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Formal => {
                "Formal and professional. Use complete sentences, polite forms of address and no slang."
            }
            Self::Normal => "Friendly and clear. Professional but approachable.",
            Self::Casual => "Relaxed and conversational, like chatting with a friend. Keep it short.",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown communication style `{0}`")]
pub struct UnknownStyle(pub String);

impl std::str::FromStr for CommunicationStyle {
    type Err = UnknownStyle;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FORMAL" => Ok(Self::Formal),
            "NORMAL" => Ok(Self::Normal),
            "CASUAL" => Ok(Self::Casual),
            other => Err(UnknownStyle(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorFlags {
    pub allow_emojis: bool,
    pub sign_messages: bool,
    pub restrict_topics: bool,
    pub split_long_messages: bool,
    pub transfer_to_human: bool,
    pub smart_retrieval: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Number,
    Boolean,
    Date,
    Select,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Select => "select",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "select" => Self::Select,
            _ => Self::Text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldDefinition {
    pub key: String,
    pub label: String,
    pub description: Option<String>,
    pub field_type: FieldType,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffTarget {
    pub id: String,
    pub name: String,
    pub email: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarIntegration {
    pub calendar_id: String,
    pub access_token: String,
    #[serde(default = "default_event_minutes")]
    pub default_event_minutes: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopifyIntegration {
    pub shop_domain: String,
    pub access_token: String,
    #[serde(default = "default_shopify_api_version")]
    pub api_version: String,
}

fn default_event_minutes() -> u32 {
    30
}

fn default_shopify_api_version() -> String {
    "2024-10".to_string()
}

/// Third-party capability enabled for an agent. Each variant owns its validated config.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", content = "config", rename_all = "snake_case")]
pub enum Integration {
    GoogleCalendar(CalendarIntegration),
    Shopify(ShopifyIntegration),
}

impl std::fmt::Debug for Integration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GoogleCalendar(config) => f
                .debug_struct("GoogleCalendar")
                .field("calendar_id", &config.calendar_id)
                .field("access_token", &"[redacted]")
                .finish(),
            Self::Shopify(config) => f
                .debug_struct("Shopify")
                .field("shop_domain", &config.shop_domain)
                .field("access_token", &"[redacted]")
                .finish(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("unsupported integration provider `{0}`")]
    UnsupportedProvider(String),
    #[error("invalid `{provider}` integration config: {message}")]
    InvalidConfig { provider: String, message: String },
}

impl Integration {
    pub fn provider(&self) -> &'static str {
        match self {
            Self::GoogleCalendar(_) => "google_calendar",
            Self::Shopify(_) => "shopify",
        }
    }

    /// Validates a stored `(provider, config_json)` pair into a typed integration.
    pub fn from_raw(provider: &str, config: &Value) -> Result<Self, IntegrationError> {
        let provider = provider.trim().to_ascii_lowercase();
        let invalid = |message: String| IntegrationError::InvalidConfig {
            provider: provider.clone(),
            message,
        };

        match provider.as_str() {
            "google_calendar" => {
                let parsed: CalendarIntegration = serde_json::from_value(config.clone())
                    .map_err(|error| invalid(error.to_string()))?;
                if parsed.calendar_id.trim().is_empty() {
                    return Err(invalid("calendar_id must not be empty".to_string()));
                }
                if parsed.access_token.trim().is_empty() {
                    return Err(invalid("access_token must not be empty".to_string()));
                }
                if parsed.default_event_minutes == 0 || parsed.default_event_minutes > 480 {
                    return Err(invalid("default_event_minutes must be in range 1..=480".to_string()));
                }
                Ok(Self::GoogleCalendar(parsed))
            }
            "shopify" => {
                let parsed: ShopifyIntegration = serde_json::from_value(config.clone())
                    .map_err(|error| invalid(error.to_string()))?;
                let domain = parsed.shop_domain.trim();
                if domain.is_empty() || domain.contains('/') || !domain.contains('.') {
                    return Err(invalid(
                        "shop_domain must be a bare host such as `acme.myshopify.com`".to_string(),
                    ));
                }
                if parsed.access_token.trim().is_empty() {
                    return Err(invalid("access_token must not be empty".to_string()));
                }
                Ok(Self::Shopify(parsed))
            }
            other => Err(IntegrationError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: AgentId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub company_name: String,
    pub persona_prompt: String,
    pub style: CommunicationStyle,
    pub model: String,
    pub temperature: f32,
    pub timezone: String,
    pub flags: BehaviorFlags,
    pub custom_fields: Vec<CustomFieldDefinition>,
    pub handoff_targets: Vec<HandoffTarget>,
    pub legacy_handoff_email: Option<String>,
    pub integrations: Vec<Integration>,
}

impl AgentConfig {
    pub fn calendar(&self) -> Option<&CalendarIntegration> {
        self.integrations.iter().find_map(|integration| match integration {
            Integration::GoogleCalendar(config) => Some(config),
            _ => None,
        })
    }

    pub fn shopify(&self) -> Option<&ShopifyIntegration> {
        self.integrations.iter().find_map(|integration| match integration {
            Integration::Shopify(config) => Some(config),
            _ => None,
        })
    }

    pub fn declared_field_keys(&self) -> Vec<String> {
        self.custom_fields.iter().map(|field| field.key.clone()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub owner_email: String,
    pub credit_balance: i64,
}
