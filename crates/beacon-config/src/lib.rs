use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BEACON_DIR_NAME: &str = ".beacon";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CATALOG_FILE_NAME: &str = "catalog.toml";
pub const DEFAULT_GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const DEFAULT_SONAR_TOKEN_ENV: &str = "SONAR_TOKEN";
pub const DEFAULT_GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_SONAR_API_BASE: &str = "https://sonarcloud.io";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7420";
pub const DEFAULT_COLLECT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AiProviderKind {
    #[default]
    Auto,
    Mock,
    Gemini,
}

impl AiProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Mock => "mock",
            Self::Gemini => "gemini",
        }
    }
}

impl std::str::FromStr for AiProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "auto" => Ok(Self::Auto),
            "mock" => Ok(Self::Mock),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!(
                "invalid provider '{other}', expected one of: auto, mock, gemini"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BeaconConfig {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub sonar: SonarConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub checks: ChecksConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token_env: default_github_token_env(),
            api_base: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SonarConfig {
    #[serde(default = "default_sonar_token_env")]
    pub token_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl Default for SonarConfig {
    fn default() -> Self {
        Self {
            token_env: default_sonar_token_env(),
            api_base: None,
            organization: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProviderKind::Auto,
            model: None,
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind: String,
    #[serde(default = "default_collect_concurrency")]
    pub collect_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_addr(),
            collect_concurrency: default_collect_concurrency(),
        }
    }
}

/// Thresholds the traffic-light checks evaluate Sonar facts against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecksConfig {
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,
    #[serde(default)]
    pub max_bugs: u64,
    #[serde(default = "default_max_code_smells")]
    pub max_code_smells: u64,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            min_coverage: default_min_coverage(),
            max_bugs: 0,
            max_code_smells: default_max_code_smells(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn beacon_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(BEACON_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    beacon_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn catalog_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    beacon_dir(workspace_root).join(CATALOG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<BeaconConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(BeaconConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: BeaconConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<BeaconConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(beacon_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = BeaconConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

fn default_github_token_env() -> String {
    DEFAULT_GITHUB_TOKEN_ENV.to_owned()
}

fn default_sonar_token_env() -> String {
    DEFAULT_SONAR_TOKEN_ENV.to_owned()
}

fn default_api_key_env() -> String {
    DEFAULT_GEMINI_API_KEY_ENV.to_owned()
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_owned()
}

fn default_collect_concurrency() -> usize {
    DEFAULT_COLLECT_CONCURRENCY
}

fn default_min_coverage() -> f64 {
    80.0
}

fn default_max_code_smells() -> u64 {
    50
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_env_name(value: &mut String, default: fn() -> String) {
    let trimmed = value.trim();
    *value = if trimmed.is_empty() {
        default()
    } else {
        trimmed.to_owned()
    };
}

fn normalize_config(mut config: BeaconConfig) -> BeaconConfig {
    config.github.api_base = normalize_optional(config.github.api_base.take());
    config.sonar.api_base = normalize_optional(config.sonar.api_base.take());
    config.sonar.organization = normalize_optional(config.sonar.organization.take());
    config.ai.model = normalize_optional(config.ai.model.take());

    normalize_env_name(&mut config.github.token_env, default_github_token_env);
    normalize_env_name(&mut config.sonar.token_env, default_sonar_token_env);
    normalize_env_name(&mut config.ai.api_key_env, default_api_key_env);

    let bind = config.server.bind.trim();
    config.server.bind = if bind.is_empty() {
        default_bind_addr()
    } else {
        bind.to_owned()
    };
    config.server.collect_concurrency = config.server.collect_concurrency.max(1);

    config
}
