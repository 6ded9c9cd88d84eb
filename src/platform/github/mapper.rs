use octocrab::models::issues::{Comment, Issue};
use octocrab::models::IssueState as GitHubIssueState;

use crate::platform::types::{IssueData, IssueState, StatusComment};

pub fn map_issue(issue: Issue) -> IssueData {
    IssueData {
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        state: if issue.state == GitHubIssueState::Open {
            IssueState::Open
        } else {
            IssueState::Closed
        },
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        html_url: issue.html_url.to_string(),
        updated_at: Some(issue.updated_at),
    }
}

pub fn map_comment(comment: Comment) -> StatusComment {
    StatusComment {
        id: comment.id.into_inner(),
        body: comment.body.unwrap_or_default(),
    }
}
