use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::{parse_timestamp, JobRecord};

/// Captures must be at least this similar (Jaro-Winkler) to count as the same failure.
pub const STRING_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Searches spanning more than this many hours are not worth running.
pub const MAX_SEARCH_HOURS: i64 = 96;

/// A request to the external similar-failure search backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarFailureQuery {
    pub failure_text: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Build the search request for a failed job, or `None` when no search is
/// warranted (no failure text, unknown head commit time, or a window that
/// would reach too far back because the merge base is old).
pub fn build_query(
    job: &JobRecord,
    merge_base_date: Option<&str>,
    lookback_hours: i64,
) -> Option<SimilarFailureQuery> {
    if job.failure_captures.is_empty() {
        return None;
    }
    let end = job.head_sha_timestamp?;

    let base = merge_base_date
        .and_then(parse_timestamp)
        .filter(|base| *base < end)
        .unwrap_or(end);
    let start = base - Duration::hours(lookback_hours);

    if end - start > Duration::hours(MAX_SEARCH_HOURS) {
        tracing::debug!(
            job = %job.name,
            hours = (end - start).num_hours(),
            "Similar failure search window too large, skipping"
        );
        return None;
    }

    Some(SimilarFailureQuery {
        failure_text: job.failure_captures.join(" "),
        start,
        end,
    })
}

/// Whether two jobs failed in the same way on the same logical job.
pub fn is_same_failure(a: &JobRecord, b: &JobRecord) -> bool {
    if a.name.is_empty() || b.name.is_empty() {
        return false;
    }
    if a.logical_name() != b.logical_name() {
        return false;
    }

    a.conclusion == b.conclusion
        && a.failure_captures.len() == b.failure_captures.len()
        && a
            .failure_captures
            .iter()
            .zip(b.failure_captures.iter())
            .all(|(x, y)| {
                strsim::jaro_winkler(&x.to_lowercase(), &y.to_lowercase())
                    >= STRING_SIMILARITY_THRESHOLD
            })
}

/// Pick the first search result that is an independent occurrence of the
/// same failure: another job, on another branch, not by the same author.
pub fn select_similar<'a>(job: &JobRecord, candidates: &'a [JobRecord]) -> Option<&'a JobRecord> {
    candidates.iter().find(|candidate| {
        candidate.id != job.id
            && candidate.head_branch != job.head_branch
            && !same_author(job, candidate)
            && is_same_failure(job, candidate)
    })
}

fn same_author(a: &JobRecord, b: &JobRecord) -> bool {
    match (a.author_email.as_deref(), b.author_email.as_deref()) {
        (Some(x), Some(y)) => !x.is_empty() && x == y,
        _ => false,
    }
}

/// Prior failures found for the jobs of one pull request, keyed by job id.
#[derive(Debug, Clone, Default)]
pub struct SimilarFailures {
    matches: HashMap<u64, JobRecord>,
}

impl SimilarFailures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job_id: u64, similar: JobRecord) {
        self.matches.insert(job_id, similar);
    }

    pub fn get(&self, job: &JobRecord) -> Option<&JobRecord> {
        self.matches.get(&job.id)
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drci::testing::failed;
    use crate::drci::Conclusion;

    const NAME: &str =
        "pull / linux-bionic-cuda12.1-py3.10-gcc9-sm86 / test (default, 1, 5, linux.g5.4xlarge.nvidia.gpu)";

    fn pr_job() -> JobRecord {
        let mut job = failed(12345, NAME);
        job.failure_captures = vec!["ERROR".to_string()];
        job.head_branch = "whatever".to_string();
        job.head_sha_timestamp = parse_timestamp("2023-08-01T00:00:00Z");
        job
    }

    fn prior_failure() -> JobRecord {
        let mut job = failed(
            54321,
            "pull / linux-bionic-cuda12.1-py3.10-gcc9-sm86 / test (default, 2, 5, linux.g5.4xlarge.nvidia.gpu, unstable)",
        );
        job.failure_captures = vec!["ERROR".to_string()];
        job.head_branch = "mock-branch".to_string();
        job
    }

    #[test]
    fn test_query_window_without_merge_base() {
        let query = build_query(&pr_job(), None, 24).unwrap();
        assert_eq!(query.failure_text, "ERROR");
        assert_eq!(query.end, parse_timestamp("2023-08-01T00:00:00Z").unwrap());
        assert_eq!(query.start, parse_timestamp("2023-07-31T00:00:00Z").unwrap());
    }

    #[test]
    fn test_query_window_extends_to_merge_base() {
        let query = build_query(&pr_job(), Some("2023-07-31T04:00:00Z"), 24).unwrap();
        assert_eq!(query.start, parse_timestamp("2023-07-30T04:00:00Z").unwrap());
    }

    #[test]
    fn test_query_skipped_for_old_merge_base() {
        // 5 days before the head commit plus a day of lookback
        assert!(build_query(&pr_job(), Some("2023-07-27T00:00:00Z"), 24).is_none());
    }

    #[test]
    fn test_query_skipped_without_head_timestamp() {
        let mut job = pr_job();
        job.head_sha_timestamp = None;
        assert!(build_query(&job, None, 24).is_none());
    }

    #[test]
    fn test_unparseable_merge_base_date_ignored() {
        let query = build_query(&pr_job(), Some("not a date"), 24).unwrap();
        assert_eq!(query.start, parse_timestamp("2023-07-31T00:00:00Z").unwrap());
    }

    #[test]
    fn test_select_similar_finds_match() {
        let candidates = [prior_failure()];
        assert!(select_similar(&pr_job(), &candidates).is_some());
    }

    #[test]
    fn test_select_similar_rejects_same_branch() {
        let mut job = pr_job();
        job.head_branch = "mock-branch".to_string();
        assert!(select_similar(&job, &[prior_failure()]).is_none());
    }

    #[test]
    fn test_select_similar_rejects_other_job_name() {
        let mut job = pr_job();
        job.name = "android-emulator-build-test / build-and-test (default, 1, 1, ubuntu-20.04-16x)"
            .to_string();
        assert!(select_similar(&job, &[prior_failure()]).is_none());
    }

    #[test]
    fn test_select_similar_rejects_same_job() {
        let mut job = pr_job();
        job.id = 54321;
        assert!(select_similar(&job, &[prior_failure()]).is_none());
    }

    #[test]
    fn test_select_similar_rejects_different_failure() {
        let mut job = pr_job();
        job.failure_captures = vec!["NOT THE SAME ERROR".to_string()];
        assert!(select_similar(&job, &[prior_failure()]).is_none());
    }

    #[test]
    fn test_select_similar_rejects_different_conclusion() {
        let mut job = pr_job();
        job.conclusion = Some(Conclusion::Neutral);
        assert!(select_similar(&job, &[prior_failure()]).is_none());
    }

    #[test]
    fn test_select_similar_rejects_same_author() {
        let mut job = pr_job();
        job.author_email = Some("dev@example.com".to_string());
        let mut prior = prior_failure();
        prior.author_email = Some("dev@example.com".to_string());
        assert!(select_similar(&job, &[prior]).is_none());
    }
}
