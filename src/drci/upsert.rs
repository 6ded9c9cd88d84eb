use super::comment::DRCI_COMMENT_START;
use crate::error::Result;
use crate::platform::CommentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(u64),
    Updated(u64),
    Unchanged(u64),
}

/// Keep exactly one status comment on `issue_number` with `body`.
///
/// The first comment carrying the start marker is the status comment. It is
/// edited only when its body differs; a new one is created only when none
/// exists.
pub async fn upsert_comment(
    store: &dyn CommentStore,
    issue_number: u64,
    body: &str,
) -> Result<UpsertOutcome> {
    let comments = store.list_comments(issue_number).await?;
    let mut existing = comments
        .iter()
        .filter(|comment| comment.body.contains(DRCI_COMMENT_START));

    let Some(canonical) = existing.next() else {
        let id = store.create_comment(issue_number, body).await?;
        tracing::info!(pr = issue_number, comment_id = id, "Created status comment");
        return Ok(UpsertOutcome::Created(id));
    };

    let extra: Vec<u64> = existing.map(|c| c.id).collect();
    if !extra.is_empty() {
        tracing::warn!(
            pr = issue_number,
            canonical = canonical.id,
            extra = ?extra,
            "Multiple status comments found, updating the first one only"
        );
    }

    if canonical.body == body {
        tracing::debug!(pr = issue_number, comment_id = canonical.id, "Status comment unchanged");
        return Ok(UpsertOutcome::Unchanged(canonical.id));
    }

    store.update_comment(canonical.id, body).await?;
    tracing::info!(pr = issue_number, comment_id = canonical.id, "Updated status comment");
    Ok(UpsertOutcome::Updated(canonical.id))
}
