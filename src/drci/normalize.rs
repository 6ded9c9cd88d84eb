use std::sync::OnceLock;

use regex::Regex;

const UNSTABLE_MARKER: &str = "unstable";

/// `(<config>, <shard>, <total>, <runner>[, unstable])` at the end of a name.
fn shard_suffix() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r", [0-9]+, [0-9]+, [^()]+\)$").unwrap())
}

/// A bare `, unstable)` closing the name.
fn unstable_suffix() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r",\s*unstable\s*\)$").unwrap())
}

/// Map a job display name to its logical name.
///
/// Shard index, shard total and runner are dropped so that every shard and
/// every retry of a job compare equal; the test config stays part of the
/// identity. A trailing unstable marker is dropped as well.
pub fn normalize_job_name(name: &str) -> String {
    let name = name.trim();
    let without_shard = shard_suffix().replace(name, ")");
    unstable_suffix().replace(&without_shard, ")").into_owned()
}

/// Whether the display name carries the unstable marker.
pub fn is_unstable_name(name: &str) -> bool {
    let name = name.trim();
    if !name.ends_with(')') {
        return false;
    }
    name.rsplit_once('(')
        .map(|(_, args)| {
            args.trim_end_matches(')')
                .split(',')
                .any(|part| part.trim() == UNSTABLE_MARKER)
        })
        .unwrap_or(false)
}
