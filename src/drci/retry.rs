use std::collections::{BTreeMap, HashMap};

use super::{JobRecord, PrJobSet};

/// Logical name -> the effective (most recent) attempt of that job.
pub type ResolvedJobs = BTreeMap<String, JobRecord>;

/// Collapse retries and shards of the same logical job into one record.
///
/// Records are grouped by `(workflow_id, logical name)` and the record with
/// the highest id wins, ids being assigned in attempt order by the CI system.
/// When several workflow runs carry the same logical job, the most recent run
/// wins the same way.
pub fn resolve_retries(jobs: &[JobRecord]) -> ResolvedJobs {
    let mut groups: HashMap<(Option<u64>, String), &JobRecord> = HashMap::new();
    for job in jobs {
        groups
            .entry((job.workflow_id, job.logical_name()))
            .and_modify(|current| {
                if job.id > current.id {
                    *current = job;
                }
            })
            .or_insert(job);
    }

    let mut resolved = ResolvedJobs::new();
    for ((_, name), job) in groups {
        match resolved.get(&name) {
            Some(existing) if existing.id >= job.id => {}
            _ => {
                resolved.insert(name, job.clone());
            }
        }
    }
    resolved
}

/// Split a snapshot of job records into one job set per pull request.
///
/// Only the records of the newest head commit of each pull request are kept.
pub fn group_by_pr(records: Vec<JobRecord>) -> BTreeMap<u64, PrJobSet> {
    let mut by_pr: BTreeMap<u64, Vec<JobRecord>> = BTreeMap::new();
    for record in records {
        if record.pr_number == 0 {
            continue;
        }
        by_pr.entry(record.pr_number).or_default().push(record);
    }

    by_pr
        .into_iter()
        .filter_map(|(pr_number, jobs)| {
            let newest = jobs.iter().max_by_key(|job| (job.head_sha_timestamp, job.id))?;
            let head_sha = newest.head_sha.clone();
            let owner_login = newest.owner_login.clone();
            let jobs: Vec<JobRecord> = jobs
                .into_iter()
                .filter(|job| job.head_sha == head_sha)
                .collect();
            Some((
                pr_number,
                PrJobSet {
                    head_sha,
                    pr_number,
                    owner_login,
                    merge_base: None,
                    jobs,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drci::testing::{failed, job, pending};
    use crate::drci::Conclusion;

    #[test]
    fn test_successful_retry_supersedes_failure() {
        let first = failed(1, "Lint");
        let retry = job(2, "Lint", Some(Conclusion::Success));
        let resolved = resolve_retries(&[first, retry]);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["Lint"].id, 2);
        assert_eq!(resolved["Lint"].conclusion, Some(Conclusion::Success));
    }

    #[test]
    fn test_latest_failed_retry_wins() {
        let jobs = [
            failed(1, "Lint"),
            job(2, "Lint", Some(Conclusion::Success)),
            failed(3, "Lint"),
        ];
        let resolved = resolve_retries(&jobs);
        assert_eq!(resolved["Lint"].id, 3);
        assert!(resolved["Lint"].is_failed());
    }

    #[test]
    fn test_order_of_input_does_not_matter() {
        let jobs = [job(2, "Lint", Some(Conclusion::Success)), failed(1, "Lint")];
        assert_eq!(resolve_retries(&jobs)["Lint"].id, 2);
    }

    #[test]
    fn test_shards_collapse_to_logical_job() {
        let jobs = [
            failed(4, "linux / test (default, 1, 2, linux.2xlarge)"),
            failed(5, "linux / test (default, 2, 2, linux.2xlarge)"),
        ];
        let resolved = resolve_retries(&jobs);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["linux / test (default)"].id, 5);
    }

    #[test]
    fn test_group_by_pr() {
        let mut other_pr = job(1, "linux-docs / build-docs (cpp)", Some(Conclusion::Success));
        other_pr.pr_number = 1000;
        let records = vec![other_pr, pending(2, "linux-docs / build-docs (cpp)"), failed(3, "Lint")];

        let by_pr = group_by_pr(records);
        assert_eq!(by_pr.len(), 2);
        assert_eq!(by_pr[&1000].jobs.len(), 1);
        assert_eq!(by_pr[&1001].jobs.len(), 2);
        assert_eq!(by_pr[&1001].owner_login, "octocat");
    }

    #[test]
    fn test_group_by_pr_keeps_newest_head() {
        let mut stale = failed(1, "Lint");
        stale.head_sha = "old".to_string();
        let fresh = failed(2, "something");

        let by_pr = group_by_pr(vec![stale, fresh]);
        let set = &by_pr[&1001];
        assert_eq!(set.head_sha, "abcdefg");
        assert_eq!(set.jobs.len(), 1);
        assert_eq!(set.jobs[0].name, "something");
    }
}
