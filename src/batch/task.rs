use crate::drci::upsert::UpsertOutcome;
use crate::drci::PrJobSet;

/// Work item for one pull request in a run.
#[derive(Debug, Clone)]
pub struct PrTask {
    pub set: PrJobSet,
}

impl PrTask {
    pub fn new(set: PrJobSet) -> Self {
        Self { set }
    }

    pub fn pr_number(&self) -> u64 {
        self.set.pr_number
    }

    pub fn description(&self) -> String {
        let short_sha = self.set.head_sha.get(..7).unwrap_or(&self.set.head_sha);
        format!(
            "Report on PR #{} at {short_sha} ({} jobs)",
            self.set.pr_number,
            self.set.jobs.len()
        )
    }
}

/// What happened to one pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrOutcome {
    Reported(UpsertOutcome),
    /// The pull request was closed; nothing posted.
    Closed,
}
