//! Configuration schema definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Agent execution settings.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Model provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Notification routing.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// User access control.
    #[serde(default)]
    pub users: UserConfig,

    /// Optional audit trail.
    #[serde(default)]
    pub audit: AuditConfig,
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Shared secret expected in the `X-API-Key` header.
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            api_key: String::new(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:7700".to_owned()
}

/// Agent execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Maximum concurrently running agents, clamped to 1–20.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Queue or reject submissions beyond the cap.
    #[serde(default)]
    pub overflow: OverflowSetting,
    /// Working directory agents operate in.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    /// Whether to route between model tiers per task; when off, every
    /// call uses the balanced tier.
    #[serde(default = "default_true")]
    pub smart_model_switching: bool,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            overflow: OverflowSetting::default(),
            working_dir: default_working_dir(),
            smart_model_switching: true,
        }
    }
}

const fn default_max_concurrent() -> usize {
    5
}

fn default_working_dir() -> String {
    ".".to_owned()
}

const fn default_true() -> bool {
    true
}

/// Overflow policy setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowSetting {
    /// Park submissions until a slot frees up.
    #[default]
    Queue,
    /// Fail fast with HTTP 429.
    Reject,
}

/// Model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider base URL.
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    /// Provider API key; usually supplied via `MODEL_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    /// Model id for the fast tier.
    #[serde(default)]
    pub fast_model: Option<String>,
    /// Model id for the balanced tier.
    #[serde(default)]
    pub balanced_model: Option<String>,
    /// Model id for the powerful tier.
    #[serde(default)]
    pub powerful_model: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: String::new(),
            fast_model: None,
            balanced_model: None,
            powerful_model: None,
        }
    }
}

fn default_provider_url() -> String {
    "https://api.model-provider.example".to_owned()
}

/// Notification routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook receiving task notifications; the log sink is used when
    /// unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Channel/target ids notifications should mention.
    #[serde(default)]
    pub targets: Vec<String>,
}

/// User access control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Users allowed to submit commands; empty means everyone.
    #[serde(default)]
    pub allowed_user_ids: Vec<String>,
    /// Per-user minimum interval between text commands.
    #[serde(default = "default_min_interval_ms")]
    pub min_message_interval_ms: u64,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            allowed_user_ids: Vec::new(),
            min_message_interval_ms: default_min_interval_ms(),
        }
    }
}

const fn default_min_interval_ms() -> u64 {
    1000
}

/// Optional append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether to write per-task audit records.
    #[serde(default)]
    pub enabled: bool,
    /// Directory for audit files.
    #[serde(default = "default_audit_dir")]
    pub dir: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_audit_dir(),
        }
    }
}

fn default_audit_dir() -> String {
    "data/audit".to_owned()
}
