use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub drci: DrciConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    pub app_id: u64,
    pub private_key_path: PathBuf,
    pub installation_id: u64,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_repo")]
    pub repo: String,
    /// Shared secret used to sign requests to the trigger endpoint.
    #[serde(default)]
    pub trigger_secret: String,
}

// Manual Debug impl to avoid leaking the trigger secret
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("app_id", &self.app_id)
            .field("private_key_path", &self.private_key_path)
            .field("installation_id", &self.installation_id)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("trigger_secret", &"[REDACTED]")
            .finish()
    }
}

impl GitHubConfig {
    pub fn repo_full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Deserialize, Clone)]
pub struct WarehouseConfig {
    /// Base URL of the ClickHouse HTTP interface.
    pub url: String,
    #[serde(default = "default_warehouse_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
}

// Manual Debug impl to avoid leaking the password
impl std::fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DrciConfig {
    #[serde(default = "default_hud_url")]
    pub hud_url: String,
    /// Repository that gets the short HUD links and the full help section.
    #[serde(default = "default_primary_repo")]
    pub primary_repo: String,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,
    /// Extra hours searched before a head commit when looking for similar failures.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    #[serde(default = "default_flaky_rules_url")]
    pub flaky_rules_url: String,
    /// Local TOML rule file; takes precedence over `flaky_rules_url` when set.
    #[serde(default)]
    pub flaky_rules_path: Option<PathBuf>,
    #[serde(default = "default_excluded_from_flakiness")]
    pub excluded_from_flakiness: Vec<String>,
    #[serde(default = "default_unstable_label")]
    pub unstable_label: String,
    #[serde(default = "default_sev_label")]
    pub sev_label: String,
    #[serde(default = "default_disable_label")]
    pub disable_label: String,
}

impl Default for DrciConfig {
    fn default() -> Self {
        Self {
            hud_url: default_hud_url(),
            primary_repo: default_primary_repo(),
            window_minutes: default_window_minutes(),
            lookback_hours: default_lookback_hours(),
            flaky_rules_url: default_flaky_rules_url(),
            flaky_rules_path: None,
            excluded_from_flakiness: default_excluded_from_flakiness(),
            unstable_label: default_unstable_label(),
            sev_label: default_sev_label(),
            disable_label: default_disable_label(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_owner() -> String {
    "pytorch".to_string()
}

fn default_repo() -> String {
    "pytorch".to_string()
}

fn default_warehouse_user() -> String {
    "default".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

fn default_hud_url() -> String {
    "https://hud.pytorch.org".to_string()
}

fn default_primary_repo() -> String {
    "pytorch/pytorch".to_string()
}

fn default_window_minutes() -> u64 {
    15
}

fn default_lookback_hours() -> i64 {
    24
}

fn default_flaky_rules_url() -> String {
    "https://raw.githubusercontent.com/pytorch/test-infra/generated-stats/stats/flaky-rules.json"
        .to_string()
}

fn default_excluded_from_flakiness() -> Vec<String> {
    vec!["lint".to_string(), "linux-docs".to_string()]
}

fn default_unstable_label() -> String {
    "unstable".to_string()
}

fn default_sev_label() -> String {
    "ci: sev".to_string()
}

fn default_disable_label() -> String {
    "skipped".to_string()
}

fn default_max_concurrency() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    500
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("drci").required(false));
        }

        // Environment variable overrides, e.g. DRCI__GITHUB__APP_ID
        builder = builder.add_source(
            config::Environment::with_prefix("DRCI")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch.max_concurrency == 0 {
            return Err(AppError::Config(
                "batch.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.batch.max_attempts == 0 {
            return Err(AppError::Config(
                "batch.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn trigger_secret(&self) -> &str {
        &self.github.trigger_secret
    }
}
