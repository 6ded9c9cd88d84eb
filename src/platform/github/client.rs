use async_trait::async_trait;
use octocrab::models::{CommentId, IssueState as GitHubIssueState};
use octocrab::params::State;
use octocrab::Octocrab;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::{CommentStore, IssueSource};

use super::auth::InstallationToken;
use super::mapper;

/// GitHub App client scoped to the configured repository.
pub struct GitHubPlatform {
    owner: String,
    repo: String,
    token: InstallationToken,
}

impl GitHubPlatform {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        if !config.private_key_path.exists() {
            return Err(AppError::Config(format!(
                "GitHub App private key not found at: {}",
                config.private_key_path.display()
            )));
        }

        Ok(Self {
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            token: InstallationToken::new(
                config.app_id,
                config.private_key_path.clone(),
                config.installation_id,
            ),
        })
    }

    /// An octocrab instance authenticated as the installation.
    async fn client(&self) -> Result<Octocrab> {
        let token = self.token.get().await?;
        Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build octocrab client: {e}")))
    }

    async fn set_issue_state(&self, issue_number: u64, state: GitHubIssueState) -> Result<()> {
        let client = self.client().await?;
        client
            .issues(&self.owner, &self.repo)
            .update(issue_number)
            .state(state)
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IssueSource for GitHubPlatform {
    async fn fetch_issues_by_label(&self, label: &str) -> Result<Vec<IssueData>> {
        let client = self.client().await?;
        let first = client
            .issues(&self.owner, &self.repo)
            .list()
            .labels(&[label.to_string()])
            .state(State::All)
            .per_page(100)
            .send()
            .await?;
        let issues = client.all_pages(first).await?;

        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(mapper::map_issue)
            .collect())
    }

    async fn is_pull_request_open(&self, pr_number: u64) -> Result<bool> {
        let client = self.client().await?;
        let pr = client.pulls(&self.owner, &self.repo).get(pr_number).await?;
        Ok(pr.state == Some(GitHubIssueState::Open))
    }
}

#[async_trait]
impl CommentStore for GitHubPlatform {
    async fn list_comments(&self, issue_number: u64) -> Result<Vec<StatusComment>> {
        let client = self.client().await?;
        let first = client
            .issues(&self.owner, &self.repo)
            .list_comments(issue_number)
            .per_page(100)
            .send()
            .await?;
        let comments = client.all_pages(first).await?;
        Ok(comments.into_iter().map(mapper::map_comment).collect())
    }

    async fn create_comment(&self, issue_number: u64, body: &str) -> Result<u64> {
        let client = self.client().await?;
        let comment = client
            .issues(&self.owner, &self.repo)
            .create_comment(issue_number, body)
            .await?;
        Ok(comment.id.into_inner())
    }

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .issues(&self.owner, &self.repo)
            .update_comment(CommentId(comment_id), body)
            .await?;
        Ok(())
    }

    async fn close_issue(&self, issue_number: u64) -> Result<()> {
        self.set_issue_state(issue_number, GitHubIssueState::Closed).await
    }

    async fn update_issue_body(&self, issue_number: u64, body: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .issues(&self.owner, &self.repo)
            .update(issue_number)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    async fn reopen_issue(&self, issue_number: u64) -> Result<()> {
        self.set_issue_state(issue_number, GitHubIssueState::Open).await
    }
}
