//! Data sources backing the classifier: job records, merge bases, flaky
//! rules and the similar-failure search.

pub mod clickhouse;
pub mod queries;
pub mod rules;

use async_trait::async_trait;

use crate::drci::rules::FlakyRule;
use crate::drci::similar::SimilarFailureQuery;
use crate::drci::{JobRecord, MergeBase};
use crate::error::Result;

pub use clickhouse::ClickHouseClient;
pub use rules::{FileRuleSource, HttpRuleSource};

#[async_trait]
pub trait JobSource: Send + Sync {
    /// Job records of every pull request with workflow activity in the last
    /// `window_minutes`.
    async fn fetch_recent_workflows(&self, window_minutes: u64) -> Result<Vec<JobRecord>>;

    /// Failed job records at the given commits.
    async fn fetch_failed_jobs_from_commits(&self, shas: &[String]) -> Result<Vec<JobRecord>>;

    async fn fetch_merge_bases(&self, shas: &[String]) -> Result<Vec<MergeBase>>;
}

#[async_trait]
pub trait SimilarFailureSearch: Send + Sync {
    /// Failed jobs whose failure text resembles the query, inside its window.
    async fn search(&self, query: &SimilarFailureQuery) -> Result<Vec<JobRecord>>;
}

#[async_trait]
pub trait FlakyRuleSource: Send + Sync {
    async fn fetch_flaky_rules(&self) -> Result<Vec<FlakyRule>>;
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory warehouse used by tests.

    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryWarehouse {
        pub recent: Vec<JobRecord>,
        pub base_jobs: Vec<JobRecord>,
        pub merge_bases: Vec<MergeBase>,
        pub similar: Vec<JobRecord>,
        pub rules: Vec<FlakyRule>,
        pub searches: Mutex<Vec<SimilarFailureQuery>>,
    }

    #[async_trait]
    impl JobSource for MemoryWarehouse {
        async fn fetch_recent_workflows(&self, _window_minutes: u64) -> Result<Vec<JobRecord>> {
            Ok(self.recent.clone())
        }

        async fn fetch_failed_jobs_from_commits(&self, shas: &[String]) -> Result<Vec<JobRecord>> {
            Ok(self
                .base_jobs
                .iter()
                .filter(|job| shas.contains(&job.head_sha))
                .cloned()
                .collect())
        }

        async fn fetch_merge_bases(&self, shas: &[String]) -> Result<Vec<MergeBase>> {
            Ok(self
                .merge_bases
                .iter()
                .filter(|mb| shas.contains(&mb.head_sha))
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl SimilarFailureSearch for MemoryWarehouse {
        async fn search(&self, query: &SimilarFailureQuery) -> Result<Vec<JobRecord>> {
            self.searches.lock().unwrap().push(query.clone());
            Ok(self.similar.clone())
        }
    }

    #[async_trait]
    impl FlakyRuleSource for MemoryWarehouse {
        async fn fetch_flaky_rules(&self) -> Result<Vec<FlakyRule>> {
            Ok(self.rules.clone())
        }
    }
}
