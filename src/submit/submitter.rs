use crate::{
    error::{CancellationError, InvariantViolation, SubmitError, SubmitResult},
    service::PxeService,
    types::{ContractCall, PendingTransaction, SentTransaction, TxReceipt, TxRequest, TxStatus},
};
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A deployed contract that accepts spam-style calls.
///
/// # Fields
/// - `address`: contract to call
/// - `function`: function name, `spam` by default
/// - `spam_count`: how many values each call consumes; call `i` starts at
///   `seed + i * spam_count` so calls in a batch never overlap
/// - `sender`: registered account the calls are sent from, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractContext {
    pub address: Address,
    pub function: String,
    pub spam_count: u64,
    pub sender: Option<H256>,
}

impl ContractContext {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            function: "spam".to_string(),
            spam_count: 15,
            sender: None,
        }
    }

    pub fn with_sender(self, sender: H256) -> Self {
        Self {
            sender: Some(sender),
            ..self
        }
    }
}

/// Sends single transactions and checks they were acknowledged as pending.
#[derive(Clone)]
pub struct TransactionSubmitter {
    service: Arc<dyn PxeService>,
}

impl TransactionSubmitter {
    pub fn new(service: Arc<dyn PxeService>) -> Self {
        Self { service }
    }

    /// Derive the call for item `index` from `seed`.
    ///
    /// Arguments are `[seed + index * spam_count, spam_count, false, true]`,
    /// i.e. a start value, a count, and the nullify/public flags.
    pub fn derive_call(context: &ContractContext, seed: u64, index: usize) -> ContractCall {
        let spam_count = U256::from(context.spam_count);
        let start = U256::from(seed) + U256::from(index) * spam_count;
        ContractCall {
            from: context.sender,
            contract: context.address,
            function: context.function.clone(),
            args: vec![start, spam_count, U256::zero(), U256::one()],
        }
    }

    /// Send call `index` against `context` and wait until it is pending.
    ///
    /// Does not wait for settlement.
    pub async fn submit_one(
        &self,
        context: &ContractContext,
        seed: u64,
        index: usize,
    ) -> SubmitResult<SentTransaction> {
        let call = Self::derive_call(context, seed, index);
        debug!(index, function = %call.function, "Sending contract call");
        let handle = self.service.send(TxRequest::Call(call)).await?;
        self.confirm_pending(index, handle).await
    }

    /// Fetch hash and receipt of a fresh transaction and check the receipt
    /// is pending with no error.
    pub async fn confirm_pending(
        &self,
        index: usize,
        handle: PendingTransaction,
    ) -> SubmitResult<SentTransaction> {
        let hash = self.service.get_hash(&handle).await?;
        info!("Tx sent with hash {:?}", hash);

        let receipt = self.service.get_receipt(&handle).await?;
        if !receipt.is_clean_pending() {
            return Err(InvariantViolation {
                index,
                hash,
                expected_status: TxStatus::Pending,
                observed_status: receipt.status,
                observed_error: receipt.error,
            }
            .into());
        }
        info!("Receipt received for {:?}", hash);

        Ok(SentTransaction {
            index,
            handle,
            hash,
            receipt,
            account: None,
            submitted_at: chrono::Utc::now().timestamp() as u64,
        })
    }

    /// Poll the receipt of `sent` until it reaches a terminal status.
    ///
    /// # Returns
    /// * `Ok(TxReceipt)` with the terminal receipt
    /// * `Err(SubmitError::Cancelled(TimedOut))` if `timeout` expires first
    /// * `Err(SubmitError::Invariant)` if the status ever moves backwards
    pub async fn wait_for_settlement(
        &self,
        sent: &SentTransaction,
        timeout: Duration,
        poll_interval: Duration,
    ) -> SubmitResult<TxReceipt> {
        let deadline = Instant::now().checked_add(timeout);
        let mut last = sent.receipt.status;

        loop {
            let receipt = self.service.get_receipt(&sent.handle).await?;
            if !receipt.status.may_follow(last) {
                return Err(InvariantViolation {
                    index: sent.index,
                    hash: sent.hash,
                    expected_status: last,
                    observed_status: receipt.status,
                    observed_error: receipt.error,
                }
                .into());
            }
            if receipt.status.is_terminal() {
                debug!(hash = ?sent.hash, status = %receipt.status, "Transaction settled");
                return Ok(receipt);
            }
            last = receipt.status;

            let pause = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(SubmitError::Cancelled(CancellationError::timed_out(format!(
                            "tx {:?} still {} after {}ms",
                            sent.hash,
                            last,
                            timeout.as_millis()
                        ))));
                    }
                    remaining.min(poll_interval)
                }
                None => poll_interval,
            };
            tokio::time::sleep(pause).await;
        }
    }
}
