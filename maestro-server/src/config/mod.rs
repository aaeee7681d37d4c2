//! Configuration management.
//!
//! Settings are resolved in three layers: defaults, an optional TOML
//! config file, then environment variable overrides. Invalid values
//! abort startup with exit code 1.

mod schema;

pub use schema::{
    AgentsConfig, ApiConfig, AuditConfig, NotificationConfig, OverflowSetting, ProviderConfig,
    ServerConfig, UserConfig,
};

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, ServerError};

/// Cap range for `MAX_CONCURRENT_AGENTS`.
const MAX_AGENTS_RANGE: std::ops::RangeInclusive<usize> = 1..=20;

/// Get the default config directory path.
#[must_use]
pub fn default_config_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".maestro")
}

/// Get the default config file path.
#[must_use]
pub fn config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration: file (when present) plus environment overrides.
pub async fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let mut config = if path.exists() {
        let content = tokio::fs::read_to_string(&path).await?;
        let config = toml::from_str(&content)
            .map_err(|e| ServerError::config(format!("failed to parse {}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded config file");
        config
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        ServerConfig::default()
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

/// Environment variables recognized on top of the file.
fn apply_env_overrides(config: &mut ServerConfig) -> Result<()> {
    if let Ok(key) = std::env::var("MAESTRO_API_KEY") {
        config.api.api_key = key;
    }
    if let Ok(key) = std::env::var("MODEL_API_KEY") {
        config.provider.api_key = key;
    }
    if let Ok(url) = std::env::var("MODEL_PROVIDER_URL") {
        config.provider.base_url = url;
    }
    if let Ok(raw) = std::env::var("MAX_CONCURRENT_AGENTS") {
        let value: usize = raw
            .parse()
            .map_err(|_| ServerError::config(format!("MAX_CONCURRENT_AGENTS not a number: {raw}")))?;
        config.agents.max_concurrent = value;
    }
    if let Ok(users) = std::env::var("ALLOWED_USER_IDS") {
        config.users.allowed_user_ids = users
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
    }
    if let Ok(raw) = std::env::var("SMART_MODEL_SWITCHING") {
        config.agents.smart_model_switching = matches!(raw.as_str(), "1" | "true" | "on");
    }
    Ok(())
}

/// Reject configurations the service cannot run with.
fn validate(config: &ServerConfig) -> Result<()> {
    if !MAX_AGENTS_RANGE.contains(&config.agents.max_concurrent) {
        return Err(ServerError::config(format!(
            "max_concurrent must be in {}..={}, got {}",
            MAX_AGENTS_RANGE.start(),
            MAX_AGENTS_RANGE.end(),
            config.agents.max_concurrent
        )));
    }
    if config.api.api_key.is_empty() {
        return Err(ServerError::config(
            "api.api_key (or MAESTRO_API_KEY) must be set",
        ));
    }
    if config.api.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ServerError::config(format!(
            "api.bind_addr is not a socket address: {}",
            config.api.bind_addr
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.api.api_key = "secret".to_owned();
        config
    }

    #[test]
    fn valid_defaults_pass() {
        assert!(validate(&base()).is_ok());
    }

    #[test]
    fn missing_api_key_fails() {
        let config = ServerConfig::default();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn out_of_range_cap_fails() {
        let mut config = base();
        config.agents.max_concurrent = 0;
        assert!(validate(&config).is_err());
        config.agents.max_concurrent = 21;
        assert!(validate(&config).is_err());
        config.agents.max_concurrent = 20;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn bad_bind_addr_fails() {
        let mut config = base();
        config.api.bind_addr = "not-an-addr".to_owned();
        assert!(validate(&config).is_err());
    }
}
