use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

/// An issue as seen by the reporting engine: disable issues, unstable
/// issues and SEVs all arrive in this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueData {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: IssueState,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub html_url: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl IssueData {
    pub fn is_open(&self) -> bool {
        self.state == IssueState::Open
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// An issue carrying the SEV label.
pub type Sev = IssueData;

/// An issue disabling one or more flaky tests in CI.
pub type DisableIssue = IssueData;

/// A comment on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusComment {
    pub id: u64,
    pub body: String,
}
