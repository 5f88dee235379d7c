//! Batch Orchestrator Module
//!
//! This module fans a batch out into independent items, runs each item's
//! fixed pipeline, and fans the outcomes back in, in submission order.
//!
//! # Architecture Flow
//! 1. Draw all per-item randomness up front (one independent draw per item)
//! 2. In calls mode, register the batch-level sender account
//! 3. Admit items through a semaphore (`max_concurrency` permits); an item
//!    that cannot start before a stop or the batch deadline never touches
//!    the service
//! 4. Run each admitted item under its own deadline
//! 5. Collect outcomes with `join_all`, which keeps input order
//!
//! # Failure Policy
//! - A domain error or a receipt invariant violation fails only its item
//! - A fatal service error (service unreachable) fails the whole batch
//! - With `fail_fast`, the first failure aborts every item not yet started

use crate::{
    account::{AccountDraw, AccountProvisioner},
    batch::{
        StopSignal,
        result::{ItemOutcome, SubmissionBatch},
    },
    config::{BatchConfig, ModeKind},
    error::{BatchError, CancellationError, ServiceError, SubmitError, SubmitResult},
    service::PxeService,
    submit::{ContractContext, TransactionSubmitter},
    types::{AccountIdentity, DeploymentPolicy, SentTransaction},
};
use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// What every item of a batch does.
#[derive(Debug, Clone)]
pub enum BatchMode {
    /// Provision and deploy one fresh account per item.
    Deployments,
    /// Call `context` once per item, with arguments derived from `seed`.
    Calls { context: ContractContext, seed: u64 },
}

impl BatchMode {
    pub fn kind(&self) -> ModeKind {
        match self {
            BatchMode::Deployments => ModeKind::Deployments,
            BatchMode::Calls { .. } => ModeKind::Calls,
        }
    }
}

/// Per-item input, prepared before any item starts.
enum Work {
    Deploy(AccountDraw),
    Call { context: Arc<ContractContext>, seed: u64 },
}

/// Why items that have not started yet must not start.
#[derive(Debug, Clone)]
struct Halt {
    index: usize,
    fatal: Option<ServiceError>,
    message: String,
}

/// State shared by all items of one run.
struct Run {
    gate: Semaphore,
    deadline: Option<Instant>,
    stop: StopSignal,
    halt: Mutex<Option<Halt>>,
}

impl Run {
    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn halt(&self) -> MutexGuard<'_, Option<Halt>> {
        self.halt.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `halt` unless one is already set. A fatal halt replaces an
    /// earlier fail-fast one, so the batch still reports the fatal error.
    fn set_halt(&self, halt: Halt) {
        let mut current = self.halt();
        let replace = match current.as_ref() {
            None => true,
            Some(existing) => existing.fatal.is_none() && halt.fatal.is_some(),
        };
        if replace {
            *current = Some(halt);
        }
    }
}

/// `now + duration`, or no deadline at all when that is not representable.
fn deadline_after(duration: Duration) -> Option<Instant> {
    Instant::now().checked_add(duration)
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Batch orchestrator
///
/// Coordinates N independent submissions against one shared service.
pub struct BatchOrchestrator {
    provisioner: AccountProvisioner,
    submitter: TransactionSubmitter,
    config: BatchConfig,
    rng: Mutex<StdRng>,
}

impl BatchOrchestrator {
    /// Creates a new batch orchestrator
    ///
    /// # Arguments
    /// * `service` - Shared service connection, used read-only by all items
    /// * `config` - Concurrency, deadlines, fail-fast and randomness seed
    /// * `policy` - Registration policy for every deployed account
    pub fn new(service: Arc<dyn PxeService>, config: BatchConfig, policy: DeploymentPolicy) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            provisioner: AccountProvisioner::new(service.clone(), policy),
            submitter: TransactionSubmitter::new(service),
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn submitter(&self) -> &TransactionSubmitter {
        &self.submitter
    }

    /// Submit `count` items in `mode`, with no external stop.
    pub async fn submit_batch(
        &self,
        count: usize,
        mode: BatchMode,
    ) -> Result<SubmissionBatch, BatchError> {
        self.submit_batch_until(count, mode, StopSignal::never()).await
    }

    /// Submit `count` items in `mode`, stopping early when `stop` fires.
    ///
    /// # Returns
    /// * `Ok(SubmissionBatch)` once every item has either produced a pending
    ///   transaction or recorded a failure
    /// * `Err(BatchError)` if the batch could not proceed at all
    pub async fn submit_batch_until(
        &self,
        count: usize,
        mode: BatchMode,
        stop: StopSignal,
    ) -> Result<SubmissionBatch, BatchError> {
        if count == 0 {
            return Err(BatchError::InvalidRequest("count must be greater than zero".into()));
        }
        if let Some(reason) = stop.current() {
            return Err(BatchError::Cancelled(reason.into()));
        }

        let started_at = chrono::Utc::now().timestamp() as u64;
        let deadline = self
            .config
            .deadline_ms
            .and_then(|ms| deadline_after(Duration::from_millis(ms)));

        info!(
            "Batch starting: count={}, mode={:?}, max_concurrency={}, fail_fast={}",
            count, mode.kind(), self.config.max_concurrency, self.config.fail_fast
        );

        let (account, work) = tokio::select! {
            biased;
            reason = stop.stopped() => return Err(BatchError::Cancelled(reason.into())),
            _ = sleep_until_opt(deadline) => return Err(BatchError::Cancelled(
                CancellationError::timed_out("batch deadline expired during setup"),
            )),
            prepared = self.prepare(count, &mode) => prepared?,
        };

        let run = Run {
            gate: Semaphore::new(self.config.max_concurrency.max(1)),
            deadline,
            stop,
            halt: Mutex::new(None),
        };

        let items = work
            .into_iter()
            .enumerate()
            .map(|(index, work)| self.run_item(&run, index, work));
        let items: Vec<ItemOutcome> = join_all(items).await;

        if let Some(Halt {
            index,
            fatal: Some(source),
            ..
        }) = run.halt.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
        {
            warn!("Batch aborted by fatal error at item {}: {}", index, source);
            return Err(BatchError::Fatal { index, source });
        }

        let batch = SubmissionBatch {
            mode: mode.kind(),
            account,
            items,
            started_at,
            finished_at: chrono::Utc::now().timestamp() as u64,
        };
        info!(
            "Batch finished: {} of {} submitted, {} failed",
            batch.succeeded(),
            count,
            batch.failures().len()
        );
        Ok(batch)
    }

    /// Draw per-item randomness and, in calls mode, register the sender.
    async fn prepare(
        &self,
        count: usize,
        mode: &BatchMode,
    ) -> Result<(Option<AccountIdentity>, Vec<Work>), BatchError> {
        match mode {
            BatchMode::Deployments => {
                let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let work = (0..count)
                    .map(|_| Work::Deploy(AccountDraw::random(&mut *rng)))
                    .collect();
                Ok((None, work))
            }
            BatchMode::Calls { context, seed } => {
                let sender = {
                    let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    AccountIdentity::random(&mut *rng)
                };
                self.provisioner
                    .register(&sender)
                    .await
                    .map_err(BatchError::Setup)?;
                debug!(address = ?sender.address(), "Sender account registered");

                let context = Arc::new(context.clone().with_sender(sender.address()));
                let work = (0..count)
                    .map(|_| Work::Call {
                        context: context.clone(),
                        seed: *seed,
                    })
                    .collect();
                Ok((Some(sender), work))
            }
        }
    }

    async fn run_item(&self, run: &Run, index: usize, work: Work) -> ItemOutcome {
        let result = match self.admit(run, index).await {
            Ok(_permit) => self.run_admitted(run, index, work).await,
            Err(err) => Err(err),
        };

        match &result {
            Ok(sent) => {
                info!(index, hash = ?sent.hash, "Item submitted");
            }
            Err(err) => {
                warn!(index, error = %err, "Item failed");
                self.record_failure(run, index, err);
            }
        }

        ItemOutcome { index, result }
    }

    /// Wait for a concurrency slot, unless a stop, the batch deadline or a
    /// halt comes first.
    async fn admit<'r>(&self, run: &'r Run, index: usize) -> SubmitResult<SemaphorePermit<'r>> {
        let permit = tokio::select! {
            biased;
            reason = run.stop.stopped() => return Err(CancellationError::from(reason).into()),
            _ = sleep_until_opt(run.deadline) => return Err(not_started_timeout(index)),
            permit = run.gate.acquire() => permit
                .map_err(|_| CancellationError::aborted(format!("item {index}: admission closed")))?,
        };

        if let Some(reason) = run.stop.current() {
            return Err(CancellationError::from(reason).into());
        }
        if run.deadline_passed() {
            return Err(not_started_timeout(index));
        }
        let halt = run.halt().clone();
        if let Some(halt) = halt {
            return Err(CancellationError::aborted(format!(
                "item {index} not started: item {} failed: {}",
                halt.index, halt.message
            ))
            .into());
        }
        Ok(permit)
    }

    async fn run_admitted(&self, run: &Run, index: usize, work: Work) -> SubmitResult<SentTransaction> {
        let item_timeout = Duration::from_millis(self.config.item_timeout_ms);
        let item_deadline = match (run.deadline, deadline_after(item_timeout)) {
            (Some(batch), Some(item)) => Some(batch.min(item)),
            (batch, item) => batch.or(item),
        };
        debug!(index, "Item started");

        tokio::select! {
            biased;
            reason = run.stop.stopped() => Err(CancellationError::from(reason).into()),
            _ = sleep_until_opt(item_deadline) => Err(CancellationError::timed_out(format!(
                "item {index} did not reach pending status before its deadline"
            ))
            .into()),
            result = self.execute(index, work) => result,
        }
    }

    async fn execute(&self, index: usize, work: Work) -> SubmitResult<SentTransaction> {
        match work {
            Work::Deploy(draw) => self
                .provisioner
                .deploy(index, draw)
                .await
                .map(|(_, sent)| sent),
            Work::Call { context, seed } => self.submitter.submit_one(&context, seed, index).await,
        }
    }

    fn record_failure(&self, run: &Run, index: usize, err: &SubmitError) {
        // Cancellations are consequences of a stop, not causes of one.
        if err.cancel_kind().is_some() {
            return;
        }
        let fatal = match err {
            SubmitError::Service(source) if source.is_fatal() => Some(source.clone()),
            _ => None,
        };
        if fatal.is_some() || self.config.fail_fast {
            run.set_halt(Halt {
                index,
                fatal,
                message: err.to_string(),
            });
        }
    }
}

fn not_started_timeout(index: usize) -> SubmitError {
    CancellationError::timed_out(format!("batch deadline expired before item {index} started")).into()
}
