use crate::{
    config::ModeKind,
    error::{CancelKind, SubmitError},
    types::{AccountIdentity, SentTransaction},
};
use ethers::types::H256;
use serde::Serialize;

/// Outcome of one batch item.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub index: usize,
    pub result: Result<SentTransaction, SubmitError>,
}

impl ItemOutcome {
    pub fn sent(&self) -> Option<&SentTransaction> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&SubmitError> {
        self.result.as_ref().err()
    }
}

/// Result of one orchestration run, in submission order.
#[derive(Debug, Clone)]
pub struct SubmissionBatch {
    pub mode: ModeKind,
    /// Sender registered for the batch, in calls mode.
    pub account: Option<AccountIdentity>,
    pub items: Vec<ItemOutcome>,
    pub started_at: u64,
    pub finished_at: u64,
}

impl SubmissionBatch {
    /// Successful transactions, in submission order.
    pub fn handles(&self) -> Vec<&SentTransaction> {
        self.items.iter().filter_map(ItemOutcome::sent).collect()
    }

    /// Failed items as `(index, error)`, in submission order.
    pub fn failures(&self) -> Vec<(usize, &SubmitError)> {
        self.items
            .iter()
            .filter_map(|item| item.error().map(|err| (item.index, err)))
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.result.is_ok()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded() == self.items.len()
    }

    pub fn summary(&self) -> BatchSummary {
        let mut cancelled = 0;
        let mut failed_indices = Vec::new();
        for (index, err) in self.failures() {
            failed_indices.push(index);
            if err.cancel_kind().is_some() {
                cancelled += 1;
            }
        }

        BatchSummary {
            mode: match self.mode {
                ModeKind::Deployments => "deployments",
                ModeKind::Calls => "calls",
            },
            count: self.items.len(),
            succeeded: self.succeeded(),
            failed: failed_indices.len() - cancelled,
            cancelled,
            failed_indices,
            hashes: self.handles().iter().map(|sent| sent.hash).collect(),
            sender: self.account.as_ref().map(AccountIdentity::address),
            failures: self
                .failures()
                .into_iter()
                .map(|(index, err)| FailureRecord {
                    index,
                    cancel_kind: err.cancel_kind(),
                    error: err.to_string(),
                })
                .collect(),
            elapsed_secs: self.finished_at.saturating_sub(self.started_at),
        }
    }
}

/// One failed item, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub index: usize,
    pub cancel_kind: Option<CancelKind>,
    pub error: String,
}

/// Serializable digest of a [`SubmissionBatch`].
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub mode: &'static str,
    pub count: usize,
    pub succeeded: usize,
    /// Failures other than cancellations.
    pub failed: usize,
    pub cancelled: usize,
    pub failed_indices: Vec<usize>,
    pub hashes: Vec<H256>,
    pub sender: Option<H256>,
    pub failures: Vec<FailureRecord>,
    pub elapsed_secs: u64,
}
