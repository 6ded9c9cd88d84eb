pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

/// Read access to issues and pull requests of the target repository.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// All issues (open and closed) carrying `label`.
    async fn fetch_issues_by_label(&self, label: &str) -> Result<Vec<IssueData>>;

    /// Whether the pull request is still open.
    async fn is_pull_request_open(&self, pr_number: u64) -> Result<bool>;
}

/// Comment and issue-state mutations on the target repository.
#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn list_comments(&self, issue_number: u64) -> Result<Vec<StatusComment>>;

    /// Create a comment and return its id.
    async fn create_comment(&self, issue_number: u64, body: &str) -> Result<u64>;

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<()>;

    async fn close_issue(&self, issue_number: u64) -> Result<()>;

    /// Replace the issue description.
    async fn update_issue_body(&self, issue_number: u64, body: &str) -> Result<()>;

    async fn reopen_issue(&self, issue_number: u64) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory code host used by tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::error::AppError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Create(u64),
        Update(u64),
        Close(u64),
        EditBody(u64),
        Reopen(u64),
    }

    #[derive(Default)]
    pub struct MemoryPlatform {
        pub comments: Mutex<HashMap<u64, Vec<StatusComment>>>,
        pub issues: Mutex<Vec<IssueData>>,
        pub closed_prs: Mutex<Vec<u64>>,
        pub calls: Mutex<Vec<Call>>,
        /// Number of upcoming calls that fail with a transient error.
        pub failures: Mutex<u32>,
        next_id: Mutex<u64>,
    }

    impl MemoryPlatform {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_issues(issues: Vec<IssueData>) -> Self {
            let platform = Self::default();
            *platform.issues.lock().unwrap() = issues;
            platform
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn comments_on(&self, issue_number: u64) -> Vec<StatusComment> {
            self.comments
                .lock()
                .unwrap()
                .get(&issue_number)
                .cloned()
                .unwrap_or_default()
        }

        fn maybe_fail(&self) -> Result<()> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::GitHubApi("simulated outage".to_string()));
            }
            Ok(())
        }

        fn set_state(&self, issue_number: u64, state: IssueState) {
            for issue in self.issues.lock().unwrap().iter_mut() {
                if issue.number == issue_number {
                    issue.state = state;
                }
            }
        }
    }

    #[async_trait]
    impl IssueSource for MemoryPlatform {
        async fn fetch_issues_by_label(&self, label: &str) -> Result<Vec<IssueData>> {
            self.maybe_fail()?;
            Ok(self
                .issues
                .lock()
                .unwrap()
                .iter()
                .filter(|issue| issue.has_label(label))
                .cloned()
                .collect())
        }

        async fn is_pull_request_open(&self, pr_number: u64) -> Result<bool> {
            Ok(!self.closed_prs.lock().unwrap().contains(&pr_number))
        }
    }

    #[async_trait]
    impl CommentStore for MemoryPlatform {
        async fn list_comments(&self, issue_number: u64) -> Result<Vec<StatusComment>> {
            self.maybe_fail()?;
            Ok(self.comments_on(issue_number))
        }

        async fn create_comment(&self, issue_number: u64, body: &str) -> Result<u64> {
            self.maybe_fail()?;
            let id = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                *next
            };
            self.comments
                .lock()
                .unwrap()
                .entry(issue_number)
                .or_default()
                .push(StatusComment {
                    id,
                    body: body.to_string(),
                });
            self.calls.lock().unwrap().push(Call::Create(issue_number));
            Ok(id)
        }

        async fn update_comment(&self, comment_id: u64, body: &str) -> Result<()> {
            self.maybe_fail()?;
            let mut comments = self.comments.lock().unwrap();
            let comment = comments
                .values_mut()
                .flatten()
                .find(|c| c.id == comment_id)
                .ok_or_else(|| AppError::GitHubRejected(format!("404: no comment {comment_id}")))?;
            comment.body = body.to_string();
            self.calls.lock().unwrap().push(Call::Update(comment_id));
            Ok(())
        }

        async fn close_issue(&self, issue_number: u64) -> Result<()> {
            self.maybe_fail()?;
            self.set_state(issue_number, IssueState::Closed);
            self.calls.lock().unwrap().push(Call::Close(issue_number));
            Ok(())
        }

        async fn update_issue_body(&self, issue_number: u64, body: &str) -> Result<()> {
            self.maybe_fail()?;
            for issue in self.issues.lock().unwrap().iter_mut() {
                if issue.number == issue_number {
                    issue.body = body.to_string();
                }
            }
            self.calls.lock().unwrap().push(Call::EditBody(issue_number));
            Ok(())
        }

        async fn reopen_issue(&self, issue_number: u64) -> Result<()> {
            self.maybe_fail()?;
            self.set_state(issue_number, IssueState::Open);
            self.calls.lock().unwrap().push(Call::Reopen(issue_number));
            Ok(())
        }
    }
}
