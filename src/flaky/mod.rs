//! Disable issues for flaky tests: body grammar and deduplication.

pub mod dedup;
pub mod disable_issue;

pub use dedup::{dedup_flaky_test_issues, pick_canonical, plan_dedup, DedupPlan};
