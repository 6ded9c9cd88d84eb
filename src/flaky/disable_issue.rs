//! Body and title grammar of disable issues.
//!
//! A single disable issue names one test in its title and lists the
//! platforms to skip on a `Platforms:` line. An aggregate issue lists many
//! tests in a fenced block after `disable the following tests:`, one
//! `test_name (suite.Class): platform, ...` line each. An empty platform
//! list means every platform.
//!
//! The formatters write platform lists lower-cased, sorted and deduplicated,
//! so parsing formatted output yields [`normalize_platforms`] of the input.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

pub const DISABLED_PREFIX: &str = "DISABLED ";
pub const AGGREGATE_PREFIX: &str = "DISABLED MULTIPLE ";
pub const AGGREGATE_LABEL: &str = "aggregate flaky test issue";

const PLATFORMS_KEY: &str = "platforms:";
const AGGREGATE_START: &str = "disable the following tests:";
const FENCE: &str = "```";

pub const SUPPORTED_PLATFORMS: &[&str] = &[
    "asan", "dynamo", "inductor", "linux", "mac", "macos", "rocm", "slow", "win", "windows", "xpu",
];

fn test_line() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(test_[a-zA-Z0-9_]+) \(([a-zA-Z0-9\._]+)\)").unwrap())
}

fn is_supported(platform: &str) -> bool {
    SUPPORTED_PLATFORMS.contains(&platform)
}

/// Test key -> platforms to skip; an empty list disables everywhere.
pub type PlatformMapping = BTreeMap<String, Vec<String>>;

/// Everything recoverable from a disable issue body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBody {
    /// Platforms of a single-test issue.
    pub platforms: Vec<String>,
    /// Per-test platforms of an aggregate issue.
    pub tests: PlatformMapping,
    /// Platform names that are not supported, per test key (`""` for a
    /// single-test issue).
    pub invalid_platforms: BTreeMap<String, Vec<String>>,
    /// Lines of the aggregate block that are not test lines.
    pub unparseable: Vec<String>,
}

impl ParsedBody {
    pub fn is_aggregate(&self) -> bool {
        !self.tests.is_empty() || !self.unparseable.is_empty()
    }
}

/// Split a comma separated platform list into sorted, deduplicated valid
/// and invalid platform names.
pub fn parse_platforms(raw: &str) -> (Vec<String>, Vec<String>) {
    split_platforms(raw.split(','))
}

/// The supported platforms of `platforms`, lower-cased, sorted and
/// deduplicated.
pub fn normalize_platforms<S: AsRef<str>>(platforms: &[S]) -> Vec<String> {
    split_platforms(platforms.iter().map(|p| p.as_ref())).0
}

/// Every platform name, supported or not, as written into an issue body.
fn written_platforms<S: AsRef<str>>(platforms: &[S]) -> String {
    let (valid, invalid) = split_platforms(platforms.iter().map(|p| p.as_ref()));
    let all: BTreeSet<String> = valid.into_iter().chain(invalid).collect();
    all.into_iter().collect::<Vec<_>>().join(", ")
}

fn split_platforms<'a>(raw: impl Iterator<Item = &'a str>) -> (Vec<String>, Vec<String>) {
    let mut valid = BTreeSet::new();
    let mut invalid = BTreeSet::new();
    for platform in raw.map(|p| p.trim().to_lowercase()) {
        if platform.is_empty() {
            continue;
        }
        if is_supported(&platform) {
            valid.insert(platform);
        } else {
            invalid.insert(platform);
        }
    }
    (valid.into_iter().collect(), invalid.into_iter().collect())
}

/// Parse a disable issue body. Never fails; anything unrecognized ends up
/// in `unparseable` or `invalid_platforms`.
pub fn parse_body(body: &str) -> ParsedBody {
    let mut parsed = ParsedBody::default();

    let lower = body.to_ascii_lowercase();
    if let Some(start) = lower.find(AGGREGATE_START) {
        let block = body[start..].split(FENCE).nth(1).unwrap_or_default();
        for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some(captures) = test_line().captures(line) else {
                parsed.unparseable.push(line.to_string());
                continue;
            };
            let key = format!("{} ({})", &captures[1], &captures[2]);
            let raw_platforms = line[captures.get(0).map_or(0, |m| m.end())..]
                .trim_start()
                .strip_prefix(':')
                .unwrap_or_default();
            let (valid, invalid) = parse_platforms(raw_platforms);
            if !invalid.is_empty() {
                parsed.invalid_platforms.insert(key.clone(), invalid);
            }
            parsed.tests.insert(key, valid);
        }
        return parsed;
    }

    let mut platforms = BTreeSet::new();
    let mut invalid = BTreeSet::new();
    for line in body.lines() {
        let Some(rest) = platforms_value(line) else {
            continue;
        };
        let (valid, bad) = parse_platforms(rest);
        platforms.extend(valid);
        invalid.extend(bad);
    }
    parsed.platforms = platforms.into_iter().collect();
    if !invalid.is_empty() {
        parsed
            .invalid_platforms
            .insert(String::new(), invalid.into_iter().collect());
    }
    parsed
}

/// Text after the key of a `Platforms:` line.
fn platforms_value(line: &str) -> Option<&str> {
    let line = line.trim();
    line.get(..PLATFORMS_KEY.len())
        .filter(|head| head.eq_ignore_ascii_case(PLATFORMS_KEY))
        .map(|_| &line[PLATFORMS_KEY.len()..])
}

/// `Platforms: a, b` line of a single-test issue.
pub fn format_platforms_line<S: AsRef<str>>(platforms: &[S]) -> String {
    format!("Platforms: {}", written_platforms(platforms))
        .trim_end()
        .to_string()
}

/// Replace the `Platforms:` line of a single-test issue body, or put one
/// in front when the body has none.
pub fn with_platforms_line<S: AsRef<str>>(body: &str, platforms: &[S]) -> String {
    let line = format_platforms_line(platforms);
    let mut lines = Vec::new();
    let mut replaced = false;
    for existing in body.lines() {
        if platforms_value(existing).is_none() {
            lines.push(existing.to_string());
        } else if !replaced {
            lines.push(line.clone());
            replaced = true;
        }
    }
    if !replaced {
        lines.insert(0, line);
    }
    lines.join("\n")
}

/// Aggregate block listing every test with its platforms, in key order.
pub fn format_tests_for_body(tests: &PlatformMapping) -> String {
    let mut body = format!("{AGGREGATE_START}\n{FENCE}\n");
    for (test, platforms) in tests {
        let written = written_platforms(platforms);
        if written.is_empty() {
            body.push_str(&format!("{test}:\n"));
        } else {
            body.push_str(&format!("{test}: {written}\n"));
        }
    }
    body.push_str(FENCE);
    body.push('\n');
    body
}

/// `test_name (suite.Class)`, defaulting the module to `__main__`.
pub fn format_test_key(name: &str, suite: &str) -> String {
    if suite.contains('.') {
        format!("{name} ({suite})")
    } else {
        format!("{name} (__main__.{suite})")
    }
}

pub fn disable_title(name: &str, suite: &str) -> String {
    format!("{DISABLED_PREFIX}{}", format_test_key(name, suite))
}

pub fn is_aggregate_title(title: &str) -> bool {
    title.trim().starts_with(AGGREGATE_PREFIX)
}

/// `(name, suite)` of a single disable issue title.
pub fn parse_title(title: &str) -> Option<(String, String)> {
    let rest = title.trim().strip_prefix(DISABLED_PREFIX)?;
    if is_aggregate_title(title) {
        return None;
    }
    let captures = test_line().captures(rest)?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

/// Parse results keyed by the SHA-256 of the body, owned by the caller.
#[derive(Debug, Default)]
pub struct ParseCache {
    entries: HashMap<[u8; 32], ParsedBody>,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&mut self, body: &str) -> &ParsedBody {
        let key: [u8; 32] = Sha256::digest(body.as_bytes()).into();
        self.entries.entry(key).or_insert_with(|| parse_body(body))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
