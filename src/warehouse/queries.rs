//! SQL sent to the warehouse. Parameters use ClickHouse `{name:Type}`
//! placeholders and are bound through the HTTP interface.

/// Every job of every pull request whose workflows changed recently. The
/// unstable marker and shard suffixes are left in the job name.
pub const RECENT_PR_JOBS: &str = r#"
WITH recent_prs AS (
    SELECT DISTINCT
        w.head_sha AS head_sha,
        pr.number AS pr_number
    FROM default.workflow_run w FINAL
    ARRAY JOIN w.pull_requests AS pr
    WHERE w.updated_at >= now() - INTERVAL {window_minutes:UInt64} MINUTE
        AND w.event = 'pull_request'
        AND w.repository.full_name = {repo:String}
)
SELECT
    j.id AS id,
    j.run_id AS workflow_id,
    concat(w.name, ' / ', j.name) AS name,
    w.name AS workflow_name,
    j.conclusion AS conclusion,
    toString(j.completed_at) AS completed_at,
    j.html_url AS html_url,
    j.head_sha AS head_sha,
    w.head_branch AS head_branch,
    p.pr_number AS pr_number,
    w.head_repository.owner.login AS owner_login,
    j.torchci_classification.captures AS failure_captures,
    if(j.torchci_classification.line = '', [], [j.torchci_classification.line]) AS failure_lines,
    j.runner_name AS runner_name,
    w.head_commit.author.email AS author_email,
    toString(w.head_commit.timestamp) AS head_sha_timestamp
FROM default.workflow_job j FINAL
JOIN default.workflow_run w FINAL ON w.id = j.run_id
JOIN recent_prs p ON p.head_sha = j.head_sha
WHERE w.event = 'pull_request'
"#;

/// Failed jobs on the given trunk commits.
pub const FAILED_JOBS_AT_COMMITS: &str = r#"
SELECT
    j.id AS id,
    j.run_id AS workflow_id,
    concat(w.name, ' / ', j.name) AS name,
    w.name AS workflow_name,
    j.conclusion AS conclusion,
    toString(j.completed_at) AS completed_at,
    j.html_url AS html_url,
    j.head_sha AS head_sha,
    w.head_branch AS head_branch,
    j.torchci_classification.captures AS failure_captures,
    if(j.torchci_classification.line = '', [], [j.torchci_classification.line]) AS failure_lines,
    j.runner_name AS runner_name
FROM default.workflow_job j FINAL
JOIN default.workflow_run w FINAL ON w.id = j.run_id
WHERE j.head_sha IN {shas:Array(String)}
    AND j.conclusion IN ('failure', 'cancelled', 'timed_out')
"#;

pub const MERGE_BASES: &str = r#"
SELECT
    sha AS head_sha,
    merge_base,
    toString(merge_base_commit_date) AS merge_base_commit_date
FROM default.merge_bases
WHERE sha IN {shas:Array(String)}
    AND repo = {repo:String}
"#;

/// Failed jobs whose captures contain the failure text, inside a window.
pub const SIMILAR_FAILURES: &str = r#"
SELECT
    j.id AS id,
    j.run_id AS workflow_id,
    concat(w.name, ' / ', j.name) AS name,
    w.name AS workflow_name,
    j.conclusion AS conclusion,
    toString(j.completed_at) AS completed_at,
    j.html_url AS html_url,
    j.head_sha AS head_sha,
    w.head_branch AS head_branch,
    j.torchci_classification.captures AS failure_captures,
    j.runner_name AS runner_name,
    w.head_commit.author.email AS author_email,
    toString(w.head_commit.timestamp) AS head_sha_timestamp
FROM default.workflow_job j FINAL
JOIN default.workflow_run w FINAL ON w.id = j.run_id
WHERE j.completed_at >= parseDateTime64BestEffort({start:String})
    AND j.completed_at < parseDateTime64BestEffort({end:String})
    AND j.conclusion IN ('failure', 'cancelled', 'timed_out')
    AND positionCaseInsensitive(
        arrayStringConcat(j.torchci_classification.captures, ' '),
        {failure:String}
    ) > 0
ORDER BY j.completed_at DESC
LIMIT {limit:UInt32}
"#;

/// Upper bound on rows returned by the similar-failure search.
pub const SIMILAR_FAILURES_LIMIT: u32 = 20;
