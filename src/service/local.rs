//! In-process simulation of the private execution environment.
//!
//! Used by the binary's dry-run mode and by the test suites. Hashes are
//! derived deterministically from the request and its sequence number,
//! receipts stay pending for a configurable number of polls and then settle,
//! and faults can be injected per send.

use super::PxeService;
use crate::{
    error::{ServiceError, ServiceResult},
    types::{
        AccountIdentity, DeploymentOptions, DeploymentTemplate, PendingTransaction,
        ProvedTemplate, TxReceipt, TxRequest, TxStatus,
    },
};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Simulation knobs.
///
/// # Fields
/// - `latency_ms`: delay applied to every service call
/// - `settle_after_polls`: number of receipt polls that report pending before
///   the transaction settles; `None` keeps transactions pending forever
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalPxeConfig {
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub settle_after_polls: Option<u32>,
}

/// What to do with a particular send, keyed by send ordinal.
#[derive(Debug, Clone)]
enum SendFault {
    /// Accept the transaction but report this receipt for it.
    Receipt { status: TxStatus, error: String },
    /// Refuse the send outright.
    Reject(String),
    /// Accept the transaction after an extra delay.
    Delay(Duration),
    /// Go down: this send and every later call fail as unavailable.
    Disconnect(String),
}

#[derive(Debug)]
struct SimulatedTx {
    hash: H256,
    status: TxStatus,
    error: String,
    polls: u32,
}

#[derive(Debug, Default)]
struct LocalState {
    /// address -> partial address
    accounts: HashMap<H256, H256>,
    deployed_accounts: HashSet<H256>,
    contracts: HashSet<Address>,
    seen_calls: HashSet<(Address, String, Vec<U256>)>,
    txs: HashMap<u64, SimulatedTx>,
    next_tx_id: u64,
    send_count: usize,
    faults: HashMap<usize, SendFault>,
    unavailable: Option<String>,
    /// Transaction ids in the order their first receipt was requested.
    acknowledged: Vec<u64>,
}

/// Simulated service.
pub struct LocalPxe {
    config: LocalPxeConfig,
    state: RwLock<LocalState>,
}

impl LocalPxe {
    pub fn new(config: LocalPxeConfig) -> Self {
        Self {
            config,
            state: RwLock::new(LocalState::default()),
        }
    }

    /// Make `address` a known contract that accepts calls.
    pub async fn deploy_contract(&self, address: Address) {
        self.state.write().await.contracts.insert(address);
    }

    /// The `ordinal`-th send (0-based) is accepted but its receipt reports
    /// `status` with `error`.
    pub async fn fail_nth_send_receipt(&self, ordinal: usize, status: TxStatus, error: &str) {
        let fault = SendFault::Receipt {
            status,
            error: error.to_string(),
        };
        self.state.write().await.faults.insert(ordinal, fault);
    }

    /// The `ordinal`-th send (0-based) is rejected with `reason`.
    pub async fn reject_nth_send(&self, ordinal: usize, reason: &str) {
        let fault = SendFault::Reject(reason.to_string());
        self.state.write().await.faults.insert(ordinal, fault);
    }

    /// The `ordinal`-th send (0-based) takes `delay` longer than usual.
    pub async fn delay_nth_send(&self, ordinal: usize, delay: Duration) {
        self.state
            .write()
            .await
            .faults
            .insert(ordinal, SendFault::Delay(delay));
    }

    /// The `ordinal`-th send (0-based) finds the service gone, and so does
    /// every call after it.
    pub async fn go_down_at_send(&self, ordinal: usize, reason: &str) {
        let fault = SendFault::Disconnect(reason.to_string());
        self.state.write().await.faults.insert(ordinal, fault);
    }

    /// Every subsequent call fails with `ServiceError::Unavailable`.
    pub async fn set_unavailable(&self, reason: &str) {
        self.state.write().await.unavailable = Some(reason.to_string());
    }

    pub async fn registered_accounts(&self) -> usize {
        self.state.read().await.accounts.len()
    }

    pub async fn send_count(&self) -> usize {
        self.state.read().await.send_count
    }

    /// Transaction ids in the order they were first acknowledged.
    pub async fn acknowledged(&self) -> Vec<u64> {
        self.state.read().await.acknowledged.clone()
    }

    async fn enter(&self) -> ServiceResult<()> {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
        match &self.state.read().await.unavailable {
            Some(reason) => Err(ServiceError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

fn tx_hash(id: u64, request: &TxRequest) -> ServiceResult<H256> {
    let encoded =
        serde_json::to_vec(request).map_err(|e| ServiceError::InvalidArgument(e.to_string()))?;
    let mut data = Vec::with_capacity(encoded.len() + 8);
    data.extend_from_slice(&id.to_be_bytes());
    data.extend_from_slice(&encoded);
    Ok(H256::from(keccak256(data)))
}

#[async_trait]
impl PxeService for LocalPxe {
    async fn register_account(&self, secret_key: H256, partial_address: H256) -> ServiceResult<()> {
        self.enter().await?;
        let identity = AccountIdentity::from_secret_and_partial(secret_key, partial_address);
        let mut state = self.state.write().await;
        state.accounts.insert(identity.address(), partial_address);
        debug!(address = ?identity.address(), "Account registered");
        Ok(())
    }

    async fn build_deployment(
        &self,
        identity: &AccountIdentity,
        options: DeploymentOptions,
    ) -> ServiceResult<DeploymentTemplate> {
        self.enter().await?;
        let state = self.state.read().await;
        if !state.accounts.contains_key(&identity.address()) {
            return Err(ServiceError::NotFound(format!(
                "account {:?} is not registered",
                identity.address()
            )));
        }
        if state.deployed_accounts.contains(&identity.address()) {
            return Err(ServiceError::Rejected(format!(
                "account {:?} is already deployed",
                identity.address()
            )));
        }
        Ok(DeploymentTemplate {
            account: identity.address(),
            options,
        })
    }

    async fn attach_proof(&self, template: DeploymentTemplate) -> ServiceResult<ProvedTemplate> {
        self.enter().await?;
        let encoded = serde_json::to_vec(&template)
            .map_err(|e| ServiceError::Proof(format!("cannot encode template: {e}")))?;
        Ok(ProvedTemplate {
            template,
            proof: keccak256(encoded).to_vec(),
        })
    }

    async fn send(&self, request: TxRequest) -> ServiceResult<PendingTransaction> {
        self.enter().await?;

        let fault = {
            let mut state = self.state.write().await;
            let ordinal = state.send_count;
            state.send_count += 1;
            let fault = state.faults.remove(&ordinal);
            if let Some(SendFault::Disconnect(reason)) = &fault {
                state.unavailable = Some(reason.clone());
            }
            fault
        };

        let (status, error) = match fault {
            Some(SendFault::Reject(reason)) => return Err(ServiceError::Rejected(reason)),
            Some(SendFault::Disconnect(reason)) => return Err(ServiceError::Unavailable(reason)),
            Some(SendFault::Receipt { status, error }) => (status, error),
            Some(SendFault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                (TxStatus::Pending, String::new())
            }
            None => (TxStatus::Pending, String::new()),
        };

        let mut state = self.state.write().await;
        match &request {
            TxRequest::Deployment(proved) => {
                let account = proved.template.account;
                if !state.deployed_accounts.insert(account) {
                    return Err(ServiceError::Rejected(format!(
                        "account {account:?} is already deployed"
                    )));
                }
            }
            TxRequest::Call(call) => {
                if let Some(from) = call.from {
                    if !state.accounts.contains_key(&from) {
                        return Err(ServiceError::NotFound(format!(
                            "sender {from:?} is not registered"
                        )));
                    }
                }
                if !state.contracts.contains(&call.contract) {
                    return Err(ServiceError::NotFound(format!(
                        "no contract at {:?}",
                        call.contract
                    )));
                }
                let key = (call.contract, call.function.clone(), call.args.clone());
                if !state.seen_calls.insert(key) {
                    return Err(ServiceError::Rejected(format!(
                        "duplicate arguments for {}",
                        call.function
                    )));
                }
            }
        }

        let id = state.next_tx_id;
        state.next_tx_id += 1;
        let hash = tx_hash(id, &request)?;
        state.txs.insert(
            id,
            SimulatedTx {
                hash,
                status,
                error,
                polls: 0,
            },
        );
        debug!(id, ?hash, "Transaction accepted");
        Ok(PendingTransaction::new(id))
    }

    async fn get_hash(&self, tx: &PendingTransaction) -> ServiceResult<H256> {
        self.enter().await?;
        let state = self.state.read().await;
        state
            .txs
            .get(&tx.id())
            .map(|sim| sim.hash)
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {}", tx.id())))
    }

    async fn get_receipt(&self, tx: &PendingTransaction) -> ServiceResult<TxReceipt> {
        self.enter().await?;
        let settle_after = self.config.settle_after_polls;
        let mut state = self.state.write().await;
        let sim = state
            .txs
            .get_mut(&tx.id())
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {}", tx.id())))?;

        let first_poll = sim.polls == 0;
        if sim.status == TxStatus::Pending {
            if let Some(limit) = settle_after {
                if sim.polls >= limit {
                    sim.status = TxStatus::Success;
                }
            }
        }
        sim.polls = sim.polls.saturating_add(1);
        let receipt = TxReceipt {
            status: sim.status,
            error: sim.error.clone(),
        };

        if first_poll {
            state.acknowledged.push(tx.id());
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContractCall, DeploymentPolicy};

    fn call(arg: u64) -> TxRequest {
        TxRequest::Call(ContractCall {
            from: None,
            contract: Address::repeat_byte(1),
            function: "spam".to_string(),
            args: vec![U256::from(arg)],
        })
    }

    #[tokio::test]
    async fn test_receipts_settle_after_configured_polls() {
        let pxe = LocalPxe::new(LocalPxeConfig {
            latency_ms: 0,
            settle_after_polls: Some(2),
        });
        pxe.deploy_contract(Address::repeat_byte(1)).await;

        let tx = pxe.send(call(1)).await.unwrap();
        assert_eq!(pxe.get_receipt(&tx).await.unwrap().status, TxStatus::Pending);
        assert_eq!(pxe.get_receipt(&tx).await.unwrap().status, TxStatus::Pending);
        assert_eq!(pxe.get_receipt(&tx).await.unwrap().status, TxStatus::Success);
        assert_eq!(pxe.get_receipt(&tx).await.unwrap().status, TxStatus::Success);
    }

    #[tokio::test]
    async fn test_hash_is_stable() {
        let pxe = LocalPxe::new(LocalPxeConfig::default());
        pxe.deploy_contract(Address::repeat_byte(1)).await;

        let tx = pxe.send(call(1)).await.unwrap();
        let first = pxe.get_hash(&tx).await.unwrap();
        let second = pxe.get_hash(&tx).await.unwrap();
        assert_eq!(first, second);

        let other = pxe.send(call(2)).await.unwrap();
        assert_ne!(first, pxe.get_hash(&other).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_call_arguments_rejected() {
        let pxe = LocalPxe::new(LocalPxeConfig::default());
        pxe.deploy_contract(Address::repeat_byte(1)).await;

        pxe.send(call(7)).await.unwrap();
        let err = pxe.send(call(7)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_deployment_requires_registration() {
        let pxe = LocalPxe::new(LocalPxeConfig::default());
        let identity =
            AccountIdentity::from_secret_and_partial(H256::repeat_byte(1), H256::repeat_byte(2));
        let options = DeploymentOptions {
            policy: DeploymentPolicy::bootstrap(),
            salt: H256::zero(),
        };

        let err = pxe.build_deployment(&identity, options).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        pxe.register_account(identity.secret_key(), identity.partial_address())
            .await
            .unwrap();
        let template = pxe.build_deployment(&identity, options).await.unwrap();
        assert_eq!(template.account, identity.address());
        assert_eq!(pxe.registered_accounts().await, 1);
    }

    #[tokio::test]
    async fn test_call_from_unregistered_sender_rejected() {
        let pxe = LocalPxe::new(LocalPxeConfig::default());
        pxe.deploy_contract(Address::repeat_byte(1)).await;
        let sender =
            AccountIdentity::from_secret_and_partial(H256::repeat_byte(3), H256::repeat_byte(4));
        let from = |arg: u64| {
            TxRequest::Call(ContractCall {
                from: Some(sender.address()),
                contract: Address::repeat_byte(1),
                function: "spam".to_string(),
                args: vec![U256::from(arg)],
            })
        };

        let err = pxe.send(from(1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        pxe.register_account(sender.secret_key(), sender.partial_address())
            .await
            .unwrap();
        pxe.send(from(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_going_down_mid_run() {
        let pxe = LocalPxe::new(LocalPxeConfig::default());
        pxe.deploy_contract(Address::repeat_byte(1)).await;
        pxe.go_down_at_send(1, "node crashed").await;

        let tx = pxe.send(call(1)).await.unwrap();
        let err = pxe.send(call(2)).await.unwrap_err();
        assert_eq!(err, ServiceError::Unavailable("node crashed".to_string()));
        assert!(matches!(
            pxe.get_receipt(&tx).await,
            Err(ServiceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let pxe = LocalPxe::new(LocalPxeConfig::default());
        pxe.set_unavailable("node shut down").await;
        let err = pxe
            .register_account(H256::zero(), H256::zero())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Unavailable("node shut down".to_string()));
    }
}
