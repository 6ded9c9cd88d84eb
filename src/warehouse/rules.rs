use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::FlakyRuleSource;
use crate::drci::rules::{load_rules_file, FlakyRule};
use crate::error::{AppError, Result};

/// Rules published as a JSON array at a URL.
pub struct HttpRuleSource {
    http: reqwest::Client,
    url: String,
}

impl HttpRuleSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FlakyRuleSource for HttpRuleSource {
    async fn fetch_flaky_rules(&self) -> Result<Vec<FlakyRule>> {
        let text = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let rules: Vec<FlakyRule> = serde_json::from_str(&text)
            .map_err(|e| AppError::Rules(format!("{}: {e}", self.url)))?;
        tracing::debug!(count = rules.len(), url = %self.url, "Fetched flaky rules");
        Ok(rules)
    }
}

/// Rules kept in a local TOML file.
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FlakyRuleSource for FileRuleSource {
    async fn fetch_flaky_rules(&self) -> Result<Vec<FlakyRule>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_rules_file(&path))
            .await
            .map_err(|e| AppError::Internal(format!("rule loader panicked: {e}")))?
    }
}
