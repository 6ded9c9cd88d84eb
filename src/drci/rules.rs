use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::JobRecord;
use crate::error::{AppError, Result};

/// A known non-deterministic failure signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlakyRule {
    /// Substring matched against the job display name.
    pub name: String,
    /// Regexes matched against failure captures and failure lines.
    #[serde(default)]
    pub captures: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<FlakyRule>,
}

/// Read rules from a TOML file of `[[rule]]` tables.
pub fn load_rules_file(path: &Path) -> Result<Vec<FlakyRule>> {
    let raw = std::fs::read_to_string(path)?;
    let file: RuleFile = toml::from_str(&raw)
        .map_err(|e| AppError::Rules(format!("{}: {e}", path.display())))?;
    Ok(file.rules)
}

#[derive(Debug)]
struct CompiledRule {
    name: String,
    captures: Vec<Regex>,
}

/// Flaky rules with their capture regexes compiled once per run.
#[derive(Debug, Default)]
pub struct FlakyRuleSet {
    rules: Vec<CompiledRule>,
}

impl FlakyRuleSet {
    /// Compile `rules`. Regexes that fail to compile are logged and skipped.
    pub fn compile(rules: &[FlakyRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| CompiledRule {
                name: rule.name.clone(),
                captures: rule
                    .captures
                    .iter()
                    .filter_map(|pattern| match Regex::new(pattern) {
                        Ok(regex) => Some(regex),
                        Err(e) => {
                            tracing::warn!(
                                rule = %rule.name,
                                pattern = %pattern,
                                error = %e,
                                "Skipping invalid flaky rule capture"
                            );
                            None
                        }
                    })
                    .collect(),
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Name of the first rule matching the job, if any.
    pub fn find_match(&self, job: &JobRecord) -> Option<&str> {
        let evidence: Vec<&str> = job
            .failure_captures
            .iter()
            .chain(job.failure_lines.iter())
            .map(String::as_str)
            .filter(|text| !text.is_empty())
            .collect();
        if evidence.is_empty() {
            return None;
        }

        self.rules
            .iter()
            .find(|rule| {
                job.name.contains(&rule.name)
                    && rule
                        .captures
                        .iter()
                        .any(|regex| evidence.iter().any(|text| regex.is_match(text)))
            })
            .map(|rule| rule.name.as_str())
    }
}

/// Jobs that never count as flaky, matched case-insensitively by substring.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    patterns: Vec<String>,
}

impl Exclusions {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, job: &JobRecord) -> bool {
        let name = job.name.to_lowercase();
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drci::testing::failed;
    use std::io::Write;

    fn rule(name: &str, captures: &[&str]) -> FlakyRule {
        FlakyRule {
            name: name.to_string(),
            captures: captures.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_rule_matches_capture_regex() {
        let rules = FlakyRuleSet::compile(&[rule(
            "win",
            &["The process cannot access the file .+ because it is being used by another process"],
        )]);
        let mut job = failed(1, "win-vs2019-cpu-py3 / build");
        job.failure_captures = vec![
            "The process cannot access the file 'C:\\actions-runner\\_work\\_actions\\mock' because it is being used by another process.".to_string(),
        ];
        assert_eq!(rules.find_match(&job), Some("win"));
    }

    #[test]
    fn test_rule_matches_failure_line() {
        let rules = FlakyRuleSet::compile(&[rule(
            "macos",
            &["test_torchinductor_opinfo .+ Received signal: SIGSEGV"],
        )]);
        let mut job = failed(1, "macos-12-py3-arm64 / test (default, 2, 3, macos-m1-12)");
        job.failure_captures.clear();
        job.failure_lines = vec![
            "RuntimeError: inductor/test_torchinductor_opinfo 2/2 failed! Received signal: SIGSEGV"
                .to_string(),
        ];
        assert!(rules.find_match(&job).is_some());
    }

    #[test]
    fn test_rule_requires_name_match() {
        let rules = FlakyRuleSet::compile(&[rule("linux", &["a"])]);
        assert!(rules.find_match(&failed(1, "win / build")).is_none());
    }

    #[test]
    fn test_rule_cannot_match_nothing() {
        let rules = FlakyRuleSet::compile(&[rule("win", &[".*"])]);
        let mut job = failed(1, "win / build");
        job.failure_captures.clear();
        job.failure_lines.clear();
        assert!(rules.find_match(&job).is_none());
    }

    #[test]
    fn test_invalid_regex_is_skipped() {
        let rules = FlakyRuleSet::compile(&[rule("win", &["(unclosed", "a"])]);
        assert!(rules.find_match(&failed(1, "win / build")).is_some());
    }

    #[test]
    fn test_exclusions_are_case_insensitive() {
        let exclusions = Exclusions::new(&["lint", "linux-docs"]);
        assert!(exclusions.contains(&failed(1, "LinT / quick-checks / linux-job")));
        assert!(exclusions.contains(&failed(1, "pull / linux-docs / build-docs-python-false")));
        assert!(!exclusions.contains(&failed(1, "A")));
    }

    #[test]
    fn test_load_rules_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(
            br#"
[[rule]]
name = "linux"
captures = ["The runner has received a shutdown signal"]
"#,
        )
        .unwrap();
        let rules = load_rules_file(file.path()).unwrap();
        assert_eq!(rules, vec![rule("linux", &["The runner has received a shutdown signal"])]);
    }
}
