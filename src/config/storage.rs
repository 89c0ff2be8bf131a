use crate::config::schema::AgentConfig;
use crate::config::validation::validate_config;
use crate::error::{AgentError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration file path based on platform
pub fn get_config_path() -> PathBuf {
    let config_dir = if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|p| p.join("com.page-agent.app"))
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        dirs::config_dir()
            .map(|p| p.join("page-agent"))
            .unwrap_or_else(|| PathBuf::from("."))
    };

    config_dir.join("config.toml")
}

/// Load configuration from the default path, falling back to defaults if absent
pub fn load_config() -> Result<AgentConfig> {
    load_config_from(&get_config_path())
}

/// Load and validate configuration from `path`. A missing file yields defaults
/// without writing anything.
pub fn load_config_from(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", path);
        return Ok(AgentConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        AgentError::Config(format!("Failed to read config from {:?}: {}", path, e))
    })?;

    let config: AgentConfig = toml::from_str(&content)?;
    validate_config(&config)?;

    tracing::info!("Loaded config from {:?}", path);
    Ok(config)
}

/// Save configuration to `path`
pub fn save_config_to(config: &AgentConfig, path: &Path) -> Result<()> {
    validate_config(config)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AgentError::Config(format!(
                "Failed to create config directory {:?}: {}",
                parent, e
            ))
        })?;
    }

    let content = toml::to_string_pretty(config)?;

    fs::write(path, content).map_err(|e| {
        AgentError::Config(format!("Failed to write config to {:?}: {}", path, e))
    })?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}
