use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::queries;
use super::{JobSource, SimilarFailureSearch};
use crate::config::WarehouseConfig;
use crate::drci::similar::SimilarFailureQuery;
use crate::drci::{JobRecord, MergeBase};
use crate::error::{AppError, Result};

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// ClickHouse over its HTTP interface.
pub struct ClickHouseClient {
    http: reqwest::Client,
    url: String,
    user: String,
    password: String,
    database: String,
    /// `owner/repo` filter for pull request and merge base queries.
    repo: String,
}

impl ClickHouseClient {
    pub fn new(config: &WarehouseConfig, repo: impl Into<String>) -> Result<Self> {
        if config.url.is_empty() {
            return Err(AppError::Config("warehouse.url is not set".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            repo: repo.into(),
        })
    }

    /// Run `sql` with bound parameters and decode the JSONEachRow output.
    pub async fn query<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut query: Vec<(String, String)> = vec![
            ("database".to_string(), self.database.clone()),
            ("default_format".to_string(), "JSONEachRow".to_string()),
            (
                "output_format_json_quote_64bit_integers".to_string(),
                "0".to_string(),
            ),
        ];
        query.extend(
            params
                .iter()
                .map(|(name, value)| (format!("param_{name}"), value.clone())),
        );

        let response = self
            .http
            .post(&self.url)
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .query(&query)
            .body(sql.to_string())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Warehouse(format!(
                "{status}: {}",
                text.lines().next().unwrap_or_default()
            )));
        }
        parse_rows(&text)
    }
}

/// Decode newline-delimited JSON rows.
pub fn parse_rows<T: DeserializeOwned>(text: &str) -> Result<Vec<T>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(AppError::from))
        .collect()
}

/// Format a list of strings as a ClickHouse array literal.
pub fn array_param(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect();
    format!("[{}]", quoted.join(","))
}

#[async_trait]
impl JobSource for ClickHouseClient {
    async fn fetch_recent_workflows(&self, window_minutes: u64) -> Result<Vec<JobRecord>> {
        let rows: Vec<JobRecord> = self
            .query(
                queries::RECENT_PR_JOBS,
                &[
                    ("window_minutes", window_minutes.to_string()),
                    ("repo", self.repo.clone()),
                ],
            )
            .await?;
        tracing::debug!(rows = rows.len(), window_minutes, "Fetched recent pull request jobs");
        Ok(rows)
    }

    async fn fetch_failed_jobs_from_commits(&self, shas: &[String]) -> Result<Vec<JobRecord>> {
        if shas.is_empty() {
            return Ok(Vec::new());
        }
        self.query(
            queries::FAILED_JOBS_AT_COMMITS,
            &[("shas", array_param(shas))],
        )
        .await
    }

    async fn fetch_merge_bases(&self, shas: &[String]) -> Result<Vec<MergeBase>> {
        if shas.is_empty() {
            return Ok(Vec::new());
        }
        self.query(
            queries::MERGE_BASES,
            &[("shas", array_param(shas)), ("repo", self.repo.clone())],
        )
        .await
    }
}

#[async_trait]
impl SimilarFailureSearch for ClickHouseClient {
    async fn search(&self, query: &SimilarFailureQuery) -> Result<Vec<JobRecord>> {
        self.query(
            queries::SIMILAR_FAILURES,
            &[
                ("start", query.start.to_rfc3339()),
                ("end", query.end.to_rfc3339()),
                ("failure", query.failure_text.clone()),
                ("limit", queries::SIMILAR_FAILURES_LIMIT.to_string()),
            ],
        )
        .await
    }
}
