//! Layered configuration: built-in defaults, then the TOML config file, then
//! `CORTEX__SECTION__KEY` environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::relay::RelayConfig;
use crate::title::TitleConfig;
use crate::upstream::UpstreamConfig;

pub const APP_NAME: &str = "cortex";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    pub titles: TitleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Also write logs to this file, without colour.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: Option<String>,
    pub state_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means the localhost development origins.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

/// Load the effective configuration. A missing file is not an error.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(env_prefix.as_str())
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("server.allowed_origins"),
        )
        .build()
        .with_context(|| format!("loading config from {}", path.display()))?;

    let mut config: AppConfig = built
        .try_deserialize()
        .context("deserializing configuration")?;

    if let Some(ref file) = config.logging.file {
        let expanded = expand_str_path(file)?;
        config.logging.file = Some(expanded.display().to_string());
    }

    Ok(config)
}

/// Write the default configuration with a header comment.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {APP_NAME}\n# File: {}\n#\n# Every key can be overridden from the environment, e.g.\n# {}__UPSTREAM__API_KEY=sk-...\n\n",
        path.display(),
        env_prefix()
    )
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::DisconnectPolicy;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.upstream.model, "gpt-4o-mini");
        assert_eq!(config.upstream.base_url, "https://api.openai.com/v1");
        assert_eq!(config.relay.on_disconnect, DisconnectPolicy::Continue);
        assert_eq!(config.relay.commit_attempts, 3);
        assert_eq!(config.relay.shutdown_grace_secs, 30);
        assert_eq!(config.titles.default_title, "New Chat");
    }

    #[test]
    fn test_default_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_default_config(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Configuration for cortex"));

        let config = load_config(&path).unwrap();
        assert_eq!(config.logging.level, "info");
        assert!((config.upstream.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_file_overrides_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[server]
port = 9090
allowed_origins = ["https://chat.example.com"]

[relay]
on_disconnect = "abort"
commit_backoff_ms = 50

[titles]
enabled = false
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.allowed_origins, vec!["https://chat.example.com"]);
        assert_eq!(config.relay.on_disconnect, DisconnectPolicy::Abort);
        assert_eq!(config.relay.commit_backoff_ms, 50);
        assert_eq!(config.relay.commit_attempts, 3);
        assert!(!config.titles.enabled);
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix(), "CORTEX");
    }
}
