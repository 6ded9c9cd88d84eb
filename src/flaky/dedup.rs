use std::collections::{BTreeMap, BTreeSet};

use super::disable_issue::{
    disable_title, is_aggregate_title, parse_title, with_platforms_line, ParseCache,
    AGGREGATE_LABEL,
};
use crate::error::Result;
use crate::platform::types::{DisableIssue, IssueState};
use crate::platform::CommentStore;

/// Outcome of deduplicating a set of disable issues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupPlan {
    /// One issue per test plus every aggregate issue, ordered by number.
    /// Canonical issues carry their updated body and state.
    pub keep: Vec<DisableIssue>,
    /// Open issues superseded by a canonical one, ordered by number.
    pub close: Vec<u64>,
    /// Canonical issues whose platform list grows to cover their closed
    /// duplicates, with the new body.
    pub update: Vec<(u64, String)>,
    /// Closed canonical issues that take over from an open duplicate.
    pub reopen: Vec<u64>,
}

/// Number of platforms the issue disables the test on; no platforms means
/// all of them.
fn coverage(issue: &DisableIssue, cache: &mut ParseCache) -> usize {
    let parsed = cache.parse(&issue.body);
    if parsed.platforms.is_empty() {
        usize::MAX
    } else {
        parsed.platforms.len()
    }
}

/// The issue that stays authoritative for one test: widest platform
/// coverage, then open over closed, then the larger issue number.
pub fn pick_canonical<'a>(
    issues: &[&'a DisableIssue],
    cache: &mut ParseCache,
) -> Option<&'a DisableIssue> {
    issues
        .iter()
        .copied()
        .max_by_key(|issue| (coverage(issue, cache), issue.is_open(), issue.number))
}

fn is_aggregate(issue: &DisableIssue, cache: &mut ParseCache) -> bool {
    issue.has_label(AGGREGATE_LABEL)
        || is_aggregate_title(&issue.title)
        || cache.parse(&issue.body).is_aggregate()
}

/// Issues about the same test share a key even when the title spells the
/// default `__main__` module differently.
fn group_key(issue: &DisableIssue) -> String {
    match parse_title(&issue.title) {
        Some((name, suite)) => disable_title(&name, &suite),
        None => issue.title.trim().to_string(),
    }
}

/// Platforms the canonical issue must list so that closing `duplicates`
/// disables nothing less, or `None` when it already covers them.
fn merged_platforms(
    canonical: &DisableIssue,
    duplicates: &[&DisableIssue],
    cache: &mut ParseCache,
) -> Option<Vec<String>> {
    let own = cache.parse(&canonical.body).platforms.clone();
    if own.is_empty() {
        return None;
    }
    let mut merged: BTreeSet<String> = own.iter().cloned().collect();
    for duplicate in duplicates {
        let platforms = &cache.parse(&duplicate.body).platforms;
        if platforms.is_empty() {
            return Some(Vec::new());
        }
        merged.extend(platforms.iter().cloned());
    }
    (merged.len() != own.len()).then(|| merged.into_iter().collect())
}

/// Group issues by test and decide which to keep, update, reopen and
/// close. Independent of input order.
pub fn plan_dedup(issues: &[DisableIssue], cache: &mut ParseCache) -> DedupPlan {
    let mut plan = DedupPlan::default();
    let mut by_test: BTreeMap<String, Vec<&DisableIssue>> = BTreeMap::new();

    for issue in issues {
        if is_aggregate(issue, cache) {
            plan.keep.push(issue.clone());
        } else {
            by_test.entry(group_key(issue)).or_default().push(issue);
        }
    }

    for (title, group) in by_test {
        let Some(canonical) = pick_canonical(&group, cache) else {
            continue;
        };
        let duplicates: Vec<&DisableIssue> = group
            .iter()
            .copied()
            .filter(|issue| issue.number != canonical.number && issue.is_open())
            .collect();
        let mut kept = canonical.clone();

        if !duplicates.is_empty() {
            tracing::info!(
                title,
                canonical = canonical.number,
                duplicates = duplicates.len(),
                "Found duplicate disable issues"
            );
            if let Some(platforms) = merged_platforms(canonical, &duplicates, cache) {
                kept.body = with_platforms_line(&canonical.body, &platforms);
                plan.update.push((kept.number, kept.body.clone()));
            }
            if !canonical.is_open() {
                kept.state = IssueState::Open;
                plan.reopen.push(kept.number);
            }
        }

        plan.close.extend(duplicates.iter().map(|issue| issue.number));
        plan.keep.push(kept);
    }

    plan.keep.sort_by_key(|issue| issue.number);
    plan.close.sort_unstable();
    plan.update.sort_by_key(|(number, _)| *number);
    plan.reopen.sort_unstable();
    plan
}

/// Apply the dedup plan: the canonical issues are brought up to date
/// before their duplicates are closed. Returns the surviving issues.
pub async fn dedup_flaky_test_issues(
    store: &dyn CommentStore,
    issues: &[DisableIssue],
) -> Result<Vec<DisableIssue>> {
    let mut cache = ParseCache::new();
    let plan = plan_dedup(issues, &mut cache);

    for number in &plan.reopen {
        store.reopen_issue(*number).await?;
        tracing::info!(issue = number, "Reopened canonical disable issue");
    }
    for (number, body) in &plan.update {
        store.update_issue_body(*number, body).await?;
        tracing::info!(issue = number, "Merged platforms into canonical disable issue");
    }
    for number in &plan.close {
        store.close_issue(*number).await?;
        tracing::info!(issue = number, "Closed duplicate disable issue");
    }
    Ok(plan.keep)
}
