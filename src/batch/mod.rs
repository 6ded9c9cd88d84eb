//! The scheduled run: classify every recently active pull request and keep
//! its status comment current.

pub mod retry;
pub mod task;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::AppConfig;
use crate::drci::classify::{index_base_commit_jobs, Classifier, UnstableJobs};
use crate::drci::comment::{compose_comment, CommentTarget};
use crate::drci::retry::{group_by_pr, resolve_retries, ResolvedJobs};
use crate::drci::rules::{Exclusions, FlakyRuleSet};
use crate::drci::similar::{build_query, select_similar, SimilarFailures};
use crate::drci::upsert::{upsert_comment, UpsertOutcome};
use crate::drci::{BaseCommitJobs, MergeBase};
use crate::error::{AppError, Result};
use crate::flaky::dedup_flaky_test_issues;
use crate::platform::github::GitHubPlatform;
use crate::platform::types::{DisableIssue, Sev};
use crate::platform::{CommentStore, IssueSource};
use crate::warehouse::{
    ClickHouseClient, FileRuleSource, FlakyRuleSource, HttpRuleSource, JobSource,
    SimilarFailureSearch,
};

use retry::{with_backoff, RetryPolicy};
use task::{PrOutcome, PrTask};

/// Collaborators of a run.
pub struct BatchContext {
    pub config: Arc<AppConfig>,
    pub issues: Arc<dyn IssueSource>,
    pub comments: Arc<dyn CommentStore>,
    pub jobs: Arc<dyn JobSource>,
    pub search: Arc<dyn SimilarFailureSearch>,
    pub rules: Arc<dyn FlakyRuleSource>,
}

impl BatchContext {
    /// Wire up GitHub, the warehouse and the rule source from configuration.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self> {
        let github = Arc::new(GitHubPlatform::new(&config.github)?);
        let warehouse = Arc::new(ClickHouseClient::new(
            &config.warehouse,
            config.github.repo_full_name(),
        )?);
        let rules: Arc<dyn FlakyRuleSource> = match &config.drci.flaky_rules_path {
            Some(path) => Arc::new(FileRuleSource::new(path.clone())),
            None => Arc::new(HttpRuleSource::new(config.drci.flaky_rules_url.clone())?),
        };

        Ok(Self {
            issues: github.clone(),
            comments: github,
            jobs: warehouse.clone(),
            search: warehouse,
            rules,
            config,
        })
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.batch)
    }
}

/// Per-run totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    /// Comments created or edited.
    pub commented: usize,
    pub unchanged: usize,
    /// Pull requests found closed.
    pub closed: usize,
    /// Pull requests given up on after errors; retried next run.
    pub skipped: usize,
}

/// Inputs shared by every pull request of a run.
struct RunInputs {
    rules: FlakyRuleSet,
    exclusions: Exclusions,
    unstable: UnstableJobs,
    base_jobs: BaseCommitJobs,
    sevs: Vec<Sev>,
}

impl RunInputs {
    fn classifier<'a>(
        &'a self,
        merge_base: Option<&MergeBase>,
        similar: &'a SimilarFailures,
    ) -> Classifier<'a> {
        Classifier {
            rules: &self.rules,
            exclusions: &self.exclusions,
            unstable: &self.unstable,
            base_jobs: merge_base.and_then(|mb| self.base_jobs.get(&mb.merge_base)),
            similar,
        }
    }
}

/// Classify all pull requests with workflow activity in the last
/// `window_minutes` and upsert their status comments.
///
/// Failing to load the shared inputs fails the run. A failure on one pull
/// request only skips that pull request.
pub async fn classify_and_report(
    ctx: Arc<BatchContext>,
    window_minutes: u64,
) -> Result<BatchSummary> {
    let policy = ctx.policy();
    let drci = &ctx.config.drci;

    let records = with_backoff(&policy, "fetch recent workflows", || {
        ctx.jobs.fetch_recent_workflows(window_minutes)
    })
    .await?;
    let mut sets = group_by_pr(records);
    tracing::info!(prs = sets.len(), window_minutes, "Starting run");
    if sets.is_empty() {
        return Ok(BatchSummary::default());
    }

    let head_shas: Vec<String> = sets.values().map(|set| set.head_sha.clone()).collect();
    let merge_bases: HashMap<String, MergeBase> =
        with_backoff(&policy, "fetch merge bases", || ctx.jobs.fetch_merge_bases(&head_shas))
            .await?
            .into_iter()
            .map(|mb| (mb.head_sha.clone(), mb))
            .collect();
    for set in sets.values_mut() {
        set.merge_base = merge_bases.get(&set.head_sha).cloned();
    }

    let mut base_shas: Vec<String> = merge_bases
        .values()
        .map(|mb| mb.merge_base.clone())
        .filter(|sha| !sha.is_empty())
        .collect();
    base_shas.sort();
    base_shas.dedup();
    let base_jobs = with_backoff(&policy, "fetch merge base jobs", || {
        ctx.jobs.fetch_failed_jobs_from_commits(&base_shas)
    })
    .await?;

    let rules = with_backoff(&policy, "fetch flaky rules", || ctx.rules.fetch_flaky_rules()).await?;
    let unstable_issues = with_backoff(&policy, "fetch unstable issues", || {
        ctx.issues.fetch_issues_by_label(&drci.unstable_label)
    })
    .await?;
    let unstable_titles: Vec<&str> = unstable_issues
        .iter()
        .filter(|issue| issue.is_open())
        .map(|issue| issue.title.as_str())
        .collect();
    let sevs = with_backoff(&policy, "fetch SEVs", || {
        ctx.issues.fetch_issues_by_label(&drci.sev_label)
    })
    .await?;

    let inputs = Arc::new(RunInputs {
        rules: FlakyRuleSet::compile(&rules),
        exclusions: Exclusions::new(drci.excluded_from_flakiness.as_slice()),
        unstable: UnstableJobs::from_titles(&unstable_titles),
        base_jobs: index_base_commit_jobs(base_jobs),
        sevs,
    });

    let sem = Arc::new(Semaphore::new(ctx.config.batch.max_concurrency));
    let mut set = JoinSet::new();
    for job_set in sets.into_values() {
        let ctx = ctx.clone();
        let inputs = inputs.clone();
        let sem = sem.clone();
        let task = PrTask::new(job_set);
        set.spawn(async move {
            let pr_number = task.pr_number();
            let result = match sem.acquire().await {
                Ok(_permit) => report_pr(&ctx, &inputs, &task).await,
                Err(e) => Err(AppError::Internal(format!("semaphore closed: {e}"))),
            };
            (pr_number, result)
        });
    }

    let mut summary = BatchSummary::default();
    while let Some(joined) = set.join_next().await {
        summary.processed += 1;
        match joined {
            Ok((_, Ok(PrOutcome::Reported(UpsertOutcome::Unchanged(_))))) => summary.unchanged += 1,
            Ok((_, Ok(PrOutcome::Reported(_)))) => summary.commented += 1,
            Ok((_, Ok(PrOutcome::Closed))) => summary.closed += 1,
            Ok((pr, Err(e))) => {
                tracing::error!(pr, error = %e, "Failed to report on pull request, skipping");
                summary.skipped += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "Pull request task panicked");
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        processed = summary.processed,
        commented = summary.commented,
        unchanged = summary.unchanged,
        closed = summary.closed,
        skipped = summary.skipped,
        "Run finished"
    );
    Ok(summary)
}

async fn report_pr(ctx: &BatchContext, inputs: &RunInputs, task: &PrTask) -> Result<PrOutcome> {
    let policy = ctx.policy();
    let pr = task.pr_number();
    tracing::debug!(task = %task.description(), "Processing");

    let open = with_backoff(&policy, "check pull request state", || {
        ctx.issues.is_pull_request_open(pr)
    })
    .await?;
    if !open {
        tracing::debug!(pr, "Pull request closed, not reporting");
        return Ok(PrOutcome::Closed);
    }

    let resolved = resolve_retries(&task.set.jobs);
    let merge_base = task.set.merge_base.as_ref();

    let no_matches = SimilarFailures::new();
    let similar = find_similar_failures(
        ctx,
        &policy,
        &inputs.classifier(merge_base, &no_matches),
        &resolved,
        merge_base,
    )
    .await?;
    let result = inputs.classifier(merge_base, &similar).classify(&resolved);

    let github = &ctx.config.github;
    let drci = &ctx.config.drci;
    let target = CommentTarget {
        owner: &github.owner,
        repo: &github.repo,
        pr_number: pr,
        hud_url: &drci.hud_url,
        primary_repo: &drci.primary_repo,
    };
    let body = compose_comment(&target, &task.set.head_sha, merge_base, &result, &inputs.sevs);

    tracing::info!(
        pr,
        failed = result.failed_jobs.len(),
        flaky = result.flaky_jobs.len(),
        broken_trunk = result.broken_trunk_jobs.len(),
        unstable = result.unstable_jobs.len(),
        pending = result.pending,
        "Classified pull request"
    );

    let outcome = with_backoff(&policy, "upsert status comment", || {
        upsert_comment(ctx.comments.as_ref(), pr, &body)
    })
    .await?;
    Ok(PrOutcome::Reported(outcome))
}

/// Look up a prior occurrence for every failed job the earlier steps leave
/// unexplained.
async fn find_similar_failures(
    ctx: &BatchContext,
    policy: &RetryPolicy,
    classifier: &Classifier<'_>,
    resolved: &ResolvedJobs,
    merge_base: Option<&MergeBase>,
) -> Result<SimilarFailures> {
    let merge_base_date = merge_base.and_then(|mb| mb.merge_base_commit_date.as_deref());
    let mut similar = SimilarFailures::new();

    for job in resolved.values() {
        if !classifier.needs_similarity_lookup(job) {
            continue;
        }
        let Some(query) = build_query(job, merge_base_date, ctx.config.drci.lookback_hours) else {
            continue;
        };
        let candidates =
            with_backoff(policy, "search similar failures", || ctx.search.search(&query)).await?;
        if let Some(prior) = select_similar(job, &candidates) {
            tracing::info!(
                pr = job.pr_number,
                job = %job.name,
                similar_job = prior.id,
                "Found similar failure"
            );
            similar.insert(job.id, prior.clone());
        }
    }
    Ok(similar)
}

/// Close duplicated disable issues, returning the ones that stay.
pub async fn dedup_disable_issues(ctx: &BatchContext) -> Result<Vec<DisableIssue>> {
    let policy = ctx.policy();
    let label = &ctx.config.drci.disable_label;
    let issues = with_backoff(&policy, "fetch disable issues", || {
        ctx.issues.fetch_issues_by_label(label)
    })
    .await?;

    let kept = dedup_flaky_test_issues(ctx.comments.as_ref(), &issues).await?;
    tracing::info!(
        total = issues.len(),
        kept = kept.len(),
        "Deduplicated disable issues"
    );
    Ok(kept)
}
