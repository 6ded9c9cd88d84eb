use std::collections::HashMap;

use super::normalize::{is_unstable_name, normalize_job_name};
use super::retry::ResolvedJobs;
use super::rules::{Exclusions, FlakyRuleSet};
use super::similar::SimilarFailures;
use super::{BaseCommitJobs, ClassificationResult, CommitJobs, JobRecord};

/// Title prefix of issues that mark a job as unstable.
pub const UNSTABLE_ISSUE_PREFIX: &str = "UNSTABLE";

/// Where a job ends up in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Pending,
    Unstable,
    Flaky,
    BrokenTrunk,
    NewFailure,
    /// Succeeded or skipped; not reported.
    Passed,
}

/// One named check of the classification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Name is tracked by an unstable issue or carries the unstable marker.
    Unstable,
    /// No conclusion and not completed.
    Pending,
    /// Completed without failing.
    NotFailed,
    /// Not excluded from flakiness and matched by a flaky rule.
    FlakyRule,
    /// Not excluded from flakiness and a similar prior failure exists.
    FlakySimilar,
    /// Failed the same way on the merge base.
    BrokenTrunk,
    /// Anything left over.
    NewFailure,
}

/// Classification order; the first step whose predicate holds decides.
pub const CLASSIFICATION_ORDER: [Step; 7] = [
    Step::Unstable,
    Step::Pending,
    Step::NotFailed,
    Step::FlakyRule,
    Step::FlakySimilar,
    Step::BrokenTrunk,
    Step::NewFailure,
];

impl Step {
    pub fn category(self) -> Category {
        match self {
            Step::Unstable => Category::Unstable,
            Step::Pending => Category::Pending,
            Step::NotFailed => Category::Passed,
            Step::FlakyRule | Step::FlakySimilar => Category::Flaky,
            Step::BrokenTrunk => Category::BrokenTrunk,
            Step::NewFailure => Category::NewFailure,
        }
    }
}

/// Job names currently exempted through unstable issues.
#[derive(Debug, Clone, Default)]
pub struct UnstableJobs {
    names: Vec<String>,
}

impl UnstableJobs {
    /// Build from issue titles of the form `UNSTABLE <job name>`.
    /// Titles without the prefix are ignored.
    pub fn from_titles<S: AsRef<str>>(titles: &[S]) -> Self {
        let mut names: Vec<String> = titles
            .iter()
            .filter_map(|title| title.as_ref().trim().strip_prefix(UNSTABLE_ISSUE_PREFIX))
            .map(|rest| normalize_job_name(rest.trim()))
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    /// A job is covered when an issue names it exactly or names one of its
    /// enclosing `workflow / job` path prefixes.
    pub fn covers(&self, job: &JobRecord) -> bool {
        let logical = job.logical_name();
        self.names.iter().any(|name| {
            logical == *name
                || logical
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.starts_with(" / ") || rest.starts_with(" ("))
        })
    }
}

/// Index failed base commit jobs by commit and logical name.
pub fn index_base_commit_jobs(records: Vec<JobRecord>) -> BaseCommitJobs {
    let mut index: BaseCommitJobs = HashMap::new();
    for record in records {
        index
            .entry(record.head_sha.clone())
            .or_default()
            .entry(record.logical_name())
            .or_default()
            .push(record);
    }
    index
}

/// Everything the classifier consults besides the pull request's own jobs.
pub struct Classifier<'a> {
    pub rules: &'a FlakyRuleSet,
    pub exclusions: &'a Exclusions,
    pub unstable: &'a UnstableJobs,
    /// Jobs on the merge base, if it is known.
    pub base_jobs: Option<&'a CommitJobs>,
    pub similar: &'a SimilarFailures,
}

impl Classifier<'_> {
    fn holds(&self, step: Step, job: &JobRecord) -> bool {
        match step {
            Step::Unstable => {
                (job.is_failed() || job.is_pending())
                    && (is_unstable_name(&job.name) || self.unstable.covers(job))
            }
            Step::Pending => job.is_pending(),
            Step::NotFailed => !job.is_failed(),
            Step::FlakyRule => {
                !self.exclusions.contains(job) && self.rules.find_match(job).is_some()
            }
            Step::FlakySimilar => {
                !self.exclusions.contains(job) && self.similar.get(job).is_some()
            }
            Step::BrokenTrunk => self.is_broken_trunk(job),
            Step::NewFailure => true,
        }
    }

    fn is_broken_trunk(&self, job: &JobRecord) -> bool {
        let Some(base_jobs) = self.base_jobs else {
            return false;
        };
        base_jobs
            .get(&job.logical_name())
            .is_some_and(|records| records.iter().any(|r| r.conclusion == job.conclusion))
    }

    /// The step that decides the job's category.
    pub fn decide(&self, job: &JobRecord) -> Step {
        CLASSIFICATION_ORDER
            .iter()
            .copied()
            .find(|step| self.holds(*step, job))
            .unwrap_or(Step::NewFailure)
    }

    /// Whether the similar-failure lookup could change this job's category,
    /// i.e. every step before it falls through.
    pub fn needs_similarity_lookup(&self, job: &JobRecord) -> bool {
        !self.exclusions.contains(job)
            && CLASSIFICATION_ORDER
                .iter()
                .take_while(|step| **step != Step::FlakySimilar)
                .all(|step| !self.holds(*step, job))
    }

    pub fn classify(&self, jobs: &ResolvedJobs) -> ClassificationResult {
        let mut result = ClassificationResult::default();

        for job in jobs.values() {
            let step = self.decide(job);
            tracing::trace!(job = %job.name, step = ?step, "Classified job");
            match step.category() {
                Category::Pending => result.pending += 1,
                Category::Unstable => result.unstable_jobs.push(job.clone()),
                Category::Flaky => result.flaky_jobs.push(job.clone()),
                Category::BrokenTrunk => result.broken_trunk_jobs.push(job.clone()),
                Category::NewFailure => result.failed_jobs.push(job.clone()),
                Category::Passed => {}
            }
        }

        for list in [
            &mut result.failed_jobs,
            &mut result.flaky_jobs,
            &mut result.broken_trunk_jobs,
            &mut result.unstable_jobs,
        ] {
            list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        }
        result
    }
}
