//! Classification and reporting of CI results for pull requests.

pub mod classify;
pub mod comment;
pub mod normalize;
pub mod retry;
pub mod rules;
pub mod similar;
pub mod upsert;

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Final state reported by the CI system for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    Skipped,
    Neutral,
}

impl Conclusion {
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            Conclusion::Failure | Conclusion::Cancelled | Conclusion::TimedOut
        )
    }
}

/// One attempt of one CI job, as produced by the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    #[serde(default)]
    pub workflow_id: Option<u64>,
    /// Display name, `<workflow> / <job>`.
    pub name: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default, deserialize_with = "deserialize_conclusion")]
    pub conclusion: Option<Conclusion>,
    #[serde(default, deserialize_with = "deserialize_completed_at")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: String,
    pub head_sha: String,
    #[serde(default)]
    pub head_branch: String,
    #[serde(default)]
    pub pr_number: u64,
    #[serde(default)]
    pub owner_login: String,
    #[serde(default)]
    pub failure_captures: Vec<String>,
    #[serde(default)]
    pub failure_lines: Vec<String>,
    #[serde(default)]
    pub runner_name: String,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_completed_at")]
    pub head_sha_timestamp: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Name with shard and unstable suffixes removed.
    pub fn logical_name(&self) -> String {
        normalize::normalize_job_name(&self.name)
    }

    pub fn is_pending(&self) -> bool {
        self.conclusion.is_none() && self.completed_at.is_none()
    }

    pub fn is_failed(&self) -> bool {
        self.conclusion.is_some_and(Conclusion::is_failed)
    }
}

/// The merge base of a pull request head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeBase {
    pub head_sha: String,
    pub merge_base: String,
    /// Kept as raw text; only parsed when rendering the comment.
    #[serde(default)]
    pub merge_base_commit_date: Option<String>,
}

/// All job records of one pull request head commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PrJobSet {
    pub head_sha: String,
    pub pr_number: u64,
    pub owner_login: String,
    pub merge_base: Option<MergeBase>,
    pub jobs: Vec<JobRecord>,
}

/// Jobs at a commit, keyed by logical name.
pub type CommitJobs = HashMap<String, Vec<JobRecord>>;

/// Commit SHA -> jobs at that commit.
pub type BaseCommitJobs = HashMap<String, CommitJobs>;

/// Outcome of classifying one pull request. The four job lists are disjoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationResult {
    pub pending: usize,
    pub failed_jobs: Vec<JobRecord>,
    pub flaky_jobs: Vec<JobRecord>,
    pub broken_trunk_jobs: Vec<JobRecord>,
    pub unstable_jobs: Vec<JobRecord>,
}

impl ClassificationResult {
    pub fn unrelated_count(&self) -> usize {
        self.flaky_jobs.len() + self.broken_trunk_jobs.len() + self.unstable_jobs.len()
    }
}

fn deserialize_conclusion<'de, D>(deserializer: D) -> Result<Option<Conclusion>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw.as_deref().map(str::trim) {
        None | Some("") => None,
        Some("success") => Some(Conclusion::Success),
        Some("failure") => Some(Conclusion::Failure),
        Some("cancelled") => Some(Conclusion::Cancelled),
        Some("timed_out") => Some(Conclusion::TimedOut),
        Some("skipped") => Some(Conclusion::Skipped),
        Some(_) => Some(Conclusion::Neutral),
    })
}

/// Accepts RFC 3339 or `YYYY-MM-DD HH:MM:SS[.frac]`; the warehouse epoch
/// (`1970-01-01 00:00:00`) means "not completed".
fn deserialize_completed_at<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp).filter(|ts| ts.timestamp() > 0))
}

/// Parse the timestamp formats produced by GitHub and the warehouse.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A completed job record with sensible defaults.
    pub fn job(id: u64, name: &str, conclusion: Option<Conclusion>) -> JobRecord {
        JobRecord {
            id,
            workflow_id: Some(100),
            name: name.to_string(),
            workflow_name: name.split(" / ").next().unwrap_or_default().to_string(),
            conclusion,
            completed_at: conclusion.map(|_| parse_timestamp("2022-07-13T19:34:03Z").unwrap()),
            html_url: "a".to_string(),
            head_sha: "abcdefg".to_string(),
            head_branch: "feature".to_string(),
            pr_number: 1001,
            owner_login: "octocat".to_string(),
            failure_captures: vec!["a".to_string()],
            failure_lines: Vec::new(),
            runner_name: "dummy".to_string(),
            author_email: None,
            head_sha_timestamp: None,
        }
    }

    pub fn failed(id: u64, name: &str) -> JobRecord {
        job(id, name, Some(Conclusion::Failure))
    }

    pub fn pending(id: u64, name: &str) -> JobRecord {
        job(id, name, None)
    }
}
