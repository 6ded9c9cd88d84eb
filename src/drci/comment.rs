//! Rendering of the status comment posted on pull requests.

use std::fmt::Write;

use super::{parse_timestamp, ClassificationResult, JobRecord, MergeBase};
use crate::platform::types::Sev;

pub const DRCI_COMMENT_START: &str = "<!-- drci-comment-start -->";
pub const DRCI_COMMENT_END: &str = "<!-- drci-comment-end -->";

pub const OH_URL: &str =
    "https://github.com/pytorch/pytorch/wiki/Dev-Infra-Office-Hours";
pub const DOCS_URL: &str = "https://docs-preview.pytorch.org";
pub const BOT_COMMANDS_WIKI_URL: &str = "https://github.com/pytorch/pytorch/wiki/Bot-commands";

const MERGE_BLOCKING: &str = "merge blocking";

/// Where the comment is posted and where its links point.
#[derive(Debug, Clone)]
pub struct CommentTarget<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub pr_number: u64,
    pub hud_url: &'a str,
    /// `owner/repo` of the repository that gets the short HUD links.
    pub primary_repo: &'a str,
}

impl CommentTarget<'_> {
    fn is_primary(&self) -> bool {
        self.primary_repo == format!("{}/{}", self.owner, self.repo)
    }

    pub fn hud_pr_url(&self) -> String {
        let hud = self.hud_url.trim_end_matches('/');
        if self.is_primary() {
            format!("{hud}/pr/{}", self.pr_number)
        } else {
            format!("{hud}/pr/{}/{}/{}", self.owner, self.repo, self.pr_number)
        }
    }
}

/// The full comment body, markers included.
pub fn compose_comment(
    target: &CommentTarget<'_>,
    head_sha: &str,
    merge_base: Option<&MergeBase>,
    result: &ClassificationResult,
    sevs: &[Sev],
) -> String {
    let mut body = String::new();
    body.push_str(DRCI_COMMENT_START);
    body.push('\n');
    body.push_str(&help_header(target));
    body.push_str(&sev_banner(sevs));
    body.push_str(&results_section(target, head_sha, merge_base, result));
    body.push_str(
        "\nThis comment was automatically generated by Dr. CI and updates as new CI results arrive.\n",
    );
    body.push_str(DRCI_COMMENT_END);
    body
}

/// The fixed "Helpful Links" block at the top of the comment.
pub fn help_header(target: &CommentTarget<'_>) -> String {
    let hud_url = target.hud_pr_url();
    let hud_text = hud_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let docs = format!(
        "{DOCS_URL}/{}/{}/{}",
        target.owner, target.repo, target.pr_number
    );

    let mut out = String::from("## :link: Helpful Links\n");
    let _ = writeln!(
        out,
        "### :test_tube: See artifacts and rendered test results at [{hud_text}]({hud_url})"
    );
    let _ = writeln!(
        out,
        "* :page_facing_up: Preview [Python docs built from this PR]({docs}/index.html)"
    );
    if target.is_primary() {
        let _ = writeln!(
            out,
            "* :page_facing_up: Preview [C++ docs built from this PR]({docs}/cppdocs/index.html)"
        );
        let _ = writeln!(
            out,
            "* :question: Need help or want to give feedback on the CI? Visit the \
             [bot commands wiki]({BOT_COMMANDS_WIKI_URL}) or our [office hours]({OH_URL})"
        );
    } else {
        let _ = writeln!(
            out,
            "* :question: Need help or want to give feedback on the CI? Visit our [office hours]({OH_URL})"
        );
    }
    out.push_str("\nNote: Links to docs will display an error until the docs builds have been completed.\n\n");
    out
}

fn is_merge_blocking(sev: &Sev) -> bool {
    sev.body.to_lowercase().contains(MERGE_BLOCKING)
}

/// Banner listing open SEVs; merge-blocking ones take precedence.
pub fn sev_banner(sevs: &[Sev]) -> String {
    let open: Vec<&Sev> = sevs.iter().filter(|sev| sev.is_open()).collect();
    if open.is_empty() {
        return String::new();
    }

    let blocking: Vec<&Sev> = open.iter().copied().filter(|s| is_merge_blocking(s)).collect();
    let (listed, kind) = if blocking.is_empty() {
        (open, "Active")
    } else {
        (blocking, "Merge Blocking")
    };

    let mut out = format!(
        "## :heavy_exclamation_mark: {} {kind} SEVs\nThere are {} currently {} SEVs. \
         If your PR is affected, please view them below:\n",
        listed.len(),
        listed.len(),
        kind.to_lowercase(),
    );
    for sev in listed {
        let _ = writeln!(out, "* [{}]({})", sev.title, sev.html_url);
    }
    out.push('\n');
    out
}

fn plural(n: usize, singular: &str, plural: &str) -> String {
    if n == 1 {
        format!("{n} {singular}")
    } else {
        format!("{n} {plural}")
    }
}

/// Header line such as `## :x: 1 New Failure, 1 Pending, 2 Unrelated Failures`.
pub fn results_title(result: &ClassificationResult) -> String {
    let failed = result.failed_jobs.len();
    let unrelated = result.unrelated_count();

    let icon = if failed > 0 {
        ":x:"
    } else if result.pending > 0 || unrelated > 0 {
        ":hourglass_flowing_sand:"
    } else {
        ":white_check_mark:"
    };

    let mut counts = if failed > 0 {
        plural(failed, "New Failure", "New Failures")
    } else if unrelated > 0 {
        "No New Failures".to_string()
    } else {
        "No Failures".to_string()
    };
    if result.pending > 0 {
        let _ = write!(counts, ", {} Pending", result.pending);
    }
    if unrelated > 0 {
        let _ = write!(
            counts,
            ", {}",
            plural(unrelated, "Unrelated Failure", "Unrelated Failures")
        );
    }
    format!("## {icon} {counts}")
}

/// `As of commit ...` line, with the merge base and its age badge when known.
pub fn commit_line(head_sha: &str, merge_base: Option<&MergeBase>) -> String {
    let Some(merge_base) = merge_base.filter(|mb| !mb.merge_base.is_empty()) else {
        return format!("As of commit {head_sha}:");
    };

    let badge = merge_base
        .merge_base_commit_date
        .as_deref()
        .and_then(parse_timestamp)
        .map(|date| {
            format!(
                " (<sub><sub><img alt=\"image\" width=70 \
                 src=\"https://img.shields.io/date/{}?label=&color=FFFFFF&style=flat-square\"></sub></sub>)",
                date.timestamp()
            )
        })
        .unwrap_or_default();
    format!(
        "As of commit {head_sha} with merge base {}{badge}:",
        merge_base.merge_base
    )
}

struct Section<'a> {
    heading: &'a str,
    plural_heading: &'a str,
    singular: &'a str,
    plural: &'a str,
    open: bool,
    footer: Option<&'a str>,
}

const NEW_FAILURES: Section<'static> = Section {
    heading: "NEW FAILURE",
    plural_heading: "NEW FAILURES",
    singular: "The following job has failed",
    plural: "The following jobs have failed",
    open: true,
    footer: None,
};

const FLAKY: Section<'static> = Section {
    heading: "FLAKY",
    plural_heading: "FLAKY",
    singular: "The following job failed but was likely due to flakiness present on trunk",
    plural: "The following jobs failed but were likely due to flakiness present on trunk",
    open: false,
    footer: None,
};

const BROKEN_TRUNK: Section<'static> = Section {
    heading: "BROKEN TRUNK",
    plural_heading: "BROKEN TRUNK",
    singular: "The following job failed but was present on the merge base",
    plural: "The following jobs failed but were present on the merge base",
    open: false,
    footer: Some(":point_right: **Rebase onto the `viable/strict` branch to avoid these failures**"),
};

const UNSTABLE: Section<'static> = Section {
    heading: "UNSTABLE",
    plural_heading: "UNSTABLE",
    singular: "The following job failed but was likely due to flakiness present on trunk and has been marked as unstable",
    plural: "The following jobs failed but were likely due to flakiness present on trunk and have been marked as unstable",
    open: false,
    footer: None,
};

fn render_section(out: &mut String, section: &Section<'_>, jobs: &[JobRecord], hud_pr_url: &str) {
    if jobs.is_empty() {
        return;
    }

    let mut jobs: Vec<&JobRecord> = jobs.iter().collect();
    jobs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    let (heading, sentence) = if jobs.len() == 1 {
        (section.heading, section.singular)
    } else {
        (section.plural_heading, section.plural)
    };
    let _ = writeln!(
        out,
        "<details {}><summary><b>{heading}</b> - {sentence}:</summary><p>\n",
        if section.open { "open" } else { "closed" }
    );
    if let Some(footer) = section.footer {
        let _ = writeln!(out, "{footer}\n");
    }
    for job in jobs {
        let _ = writeln!(
            out,
            "* [{}]({hud_pr_url}#{}) ([gh]({}))",
            job.name, job.id, job.html_url
        );
        if let Some(capture) = job.failure_captures.first().filter(|c| !c.is_empty()) {
            let _ = writeln!(out, "    `{capture}`");
        }
    }
    out.push_str("</p></details>\n");
}

/// Title, commit line and one collapsible block per non-empty category.
pub fn results_section(
    target: &CommentTarget<'_>,
    head_sha: &str,
    merge_base: Option<&MergeBase>,
    result: &ClassificationResult,
) -> String {
    let mut out = results_title(result);
    out.push('\n');
    out.push_str(&commit_line(head_sha, merge_base));
    out.push('\n');

    if result.failed_jobs.is_empty() && result.unrelated_count() == 0 {
        out.push_str(":green_heart: Looks good so far! There are no failures yet. :green_heart:\n");
    }

    let hud_pr_url = target.hud_pr_url();
    for (section, jobs) in [
        (&NEW_FAILURES, &result.failed_jobs),
        (&FLAKY, &result.flaky_jobs),
        (&BROKEN_TRUNK, &result.broken_trunk_jobs),
        (&UNSTABLE, &result.unstable_jobs),
    ] {
        render_section(&mut out, section, jobs, &hud_pr_url);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drci::testing::failed;
    use crate::platform::types::{IssueData, IssueState};

    fn pytorch(pr_number: u64) -> CommentTarget<'static> {
        CommentTarget {
            owner: "pytorch",
            repo: "pytorch",
            pr_number,
            hud_url: "https://hud.pytorch.org",
            primary_repo: "pytorch/pytorch",
        }
    }

    fn sev(number: u64, body: &str, state: IssueState) -> Sev {
        IssueData {
            number,
            title: format!("SEV {number}"),
            body: body.to_string(),
            state,
            labels: vec!["ci: sev".to_string()],
            html_url: format!("https://github.com/pytorch/pytorch/issues/{number}"),
            updated_at: None,
        }
    }

    fn merge_base(date: Option<&str>) -> MergeBase {
        MergeBase {
            head_sha: "abcdefg".to_string(),
            merge_base: "1234567".to_string(),
            merge_base_commit_date: date.map(str::to_string),
        }
    }

    #[test]
    fn test_help_header_primary_repo() {
        let header = help_header(&pytorch(123));
        assert!(header.starts_with("## :link: Helpful Links"));
        assert!(header.contains(
            "### :test_tube: See artifacts and rendered test results at [hud.pytorch.org/pr/123](https://hud.pytorch.org/pr/123)"
        ));
        assert!(header.contains("Python docs built from this PR"));
        assert!(header.contains("C++ docs built from this PR"));
        assert!(header.contains("bot commands wiki"));
        assert!(header.contains(OH_URL));
        assert!(header.contains(DOCS_URL));
    }

    #[test]
    fn test_help_header_other_repo() {
        let target = CommentTarget {
            repo: "vision",
            pr_number: 42,
            ..pytorch(42)
        };
        let header = help_header(&target);
        assert!(header.contains("hud.pytorch.org/pr/pytorch/vision/42"));
        assert!(header.contains("Python docs built from this PR"));
        assert!(!header.contains("C++ docs built from this PR"));
        assert!(!header.contains("bot commands wiki"));
    }

    #[test]
    fn test_title_for_mixed_result() {
        let result = ClassificationResult {
            pending: 1,
            failed_jobs: vec![failed(1, "something")],
            flaky_jobs: vec![failed(2, "win")],
            broken_trunk_jobs: vec![failed(3, "linux")],
            unstable_jobs: vec![],
        };
        assert_eq!(
            results_title(&result),
            "## :x: 1 New Failure, 1 Pending, 2 Unrelated Failures"
        );
    }

    #[test]
    fn test_title_variants() {
        let pending_only = ClassificationResult {
            pending: 1,
            ..Default::default()
        };
        assert_eq!(
            results_title(&pending_only),
            "## :hourglass_flowing_sand: No Failures, 1 Pending"
        );

        let unrelated_only = ClassificationResult {
            flaky_jobs: vec![failed(2, "win")],
            ..Default::default()
        };
        assert_eq!(
            results_title(&unrelated_only),
            "## :hourglass_flowing_sand: No New Failures, 1 Unrelated Failure"
        );

        assert_eq!(
            results_title(&ClassificationResult::default()),
            "## :white_check_mark: No Failures"
        );

        let two_failures = ClassificationResult {
            failed_jobs: vec![failed(1, "a"), failed(2, "b")],
            ..Default::default()
        };
        assert_eq!(results_title(&two_failures), "## :x: 2 New Failures");
    }

    #[test]
    fn test_commit_line_with_badge() {
        let line = commit_line("abcdefg", Some(&merge_base(Some("2023-08-08 06:03:21"))));
        assert!(line.starts_with("As of commit abcdefg with merge base 1234567"));
        assert!(line.contains(
            "https://img.shields.io/date/1691474601?label=&color=FFFFFF&style=flat-square"
        ));
    }

    #[test]
    fn test_commit_line_bad_date_has_no_badge() {
        let line = commit_line("abcdefg", Some(&merge_base(Some("definitely not a timestamp"))));
        assert!(line.contains("with merge base 1234567"));
        assert!(!line.contains("img"));
    }

    #[test]
    fn test_commit_line_without_merge_base() {
        assert_eq!(commit_line("abcdefg", None), "As of commit abcdefg:");
    }

    #[test]
    fn test_failure_items_sorted_with_capture() {
        let mut lint = failed(1, "Lint");
        lint.failure_captures = vec!["lint error".to_string()];
        let result = ClassificationResult {
            failed_jobs: vec![failed(2, "something"), lint],
            ..Default::default()
        };
        let section = results_section(&pytorch(123), "abcdefg", None, &result);

        let lint_at = section
            .find("* [Lint](https://hud.pytorch.org/pr/123#1) ([gh](a))")
            .unwrap();
        let something_at = section
            .find("* [something](https://hud.pytorch.org/pr/123#2) ([gh](a))")
            .unwrap();
        assert!(lint_at < something_at);
        assert!(section.contains("    `lint error`"));
        assert!(section.contains("The following jobs have failed"));
        assert!(!section.contains("Looks good so far"));
    }

    #[test]
    fn test_category_sentences() {
        let result = ClassificationResult {
            failed_jobs: vec![failed(1, "a")],
            flaky_jobs: vec![failed(2, "b")],
            broken_trunk_jobs: vec![failed(3, "c")],
            unstable_jobs: vec![failed(4, "d")],
            pending: 0,
        };
        let section = results_section(&pytorch(1), "abcdefg", None, &result);
        assert!(section.contains("The following job has failed"));
        assert!(section.contains(
            "The following job failed but was likely due to flakiness present on trunk:"
        ));
        assert!(section.contains("The following job failed but was present on the merge base"));
        assert!(section.contains(
            "The following job failed but was likely due to flakiness present on trunk and has been marked as unstable"
        ));
    }

    #[test]
    fn test_green_heart_when_nothing_failed() {
        let result = ClassificationResult {
            pending: 1,
            ..Default::default()
        };
        let section = results_section(&pytorch(1), "abcdefg", None, &result);
        assert!(section.contains(
            ":green_heart: Looks good so far! There are no failures yet. :green_heart:"
        ));
        assert!(!section.contains("<details"));
    }

    #[test]
    fn test_sev_banner() {
        assert_eq!(sev_banner(&[]), "");
        assert_eq!(sev_banner(&[sev(1, "", IssueState::Closed)]), "");

        let active = sev_banner(&[sev(1, "some outage", IssueState::Open)]);
        assert!(active.starts_with("## :heavy_exclamation_mark: 1 Active SEVs"));

        let blocking = sev_banner(&[
            sev(1, "some outage", IssueState::Open),
            sev(2, "This is MERGE BLOCKING", IssueState::Open),
        ]);
        assert!(blocking.starts_with("## :heavy_exclamation_mark: 1 Merge Blocking SEVs"));
        assert!(blocking.contains("SEV 2"));
        assert!(!blocking.contains("SEV 1]"));
    }

    #[test]
    fn test_compose_is_wrapped_in_markers() {
        let result = ClassificationResult::default();
        let body = compose_comment(&pytorch(1), "abcdefg", None, &result, &[]);
        assert!(body.starts_with(DRCI_COMMENT_START));
        assert!(body.ends_with(DRCI_COMMENT_END));
        assert!(body.contains(
            "This comment was automatically generated by Dr. CI and updates as new CI results arrive."
        ));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let result = ClassificationResult {
            failed_jobs: vec![failed(1, "a"), failed(2, "b")],
            ..Default::default()
        };
        let mut reversed = result.clone();
        reversed.failed_jobs.reverse();
        assert_eq!(
            compose_comment(&pytorch(1), "abcdefg", None, &result, &[]),
            compose_comment(&pytorch(1), "abcdefg", None, &reversed, &[])
        );
    }
}
