//! Private Execution Environment Service Module
//!
//! This module defines the contract the submitter expects from the external
//! service that registers accounts, builds and proves deployments, and
//! accepts transactions:
//! - `PxeService`: the async service contract
//! - `LocalPxe`: an in-process simulation of that contract

mod local;

pub use local::{LocalPxe, LocalPxeConfig};

use crate::{
    error::ServiceResult,
    types::{
        AccountIdentity, DeploymentOptions, DeploymentTemplate, PendingTransaction,
        ProvedTemplate, TxReceipt, TxRequest,
    },
};
use async_trait::async_trait;
use ethers::types::H256;

/// Operations the external private execution environment must provide.
///
/// Implementations are shared read-only across concurrently running items,
/// so every method takes `&self`.
#[async_trait]
pub trait PxeService: Send + Sync {
    /// Register an account so the service can act on its behalf.
    async fn register_account(&self, secret_key: H256, partial_address: H256) -> ServiceResult<()>;

    /// Build an unproved deployment for `identity`.
    async fn build_deployment(
        &self,
        identity: &AccountIdentity,
        options: DeploymentOptions,
    ) -> ServiceResult<DeploymentTemplate>;

    /// Ask the proof subsystem to prove a deployment template.
    async fn attach_proof(&self, template: DeploymentTemplate) -> ServiceResult<ProvedTemplate>;

    /// Submit a proved deployment or a contract call.
    async fn send(&self, request: TxRequest) -> ServiceResult<PendingTransaction>;

    /// Content hash of a sent transaction. Idempotent.
    async fn get_hash(&self, tx: &PendingTransaction) -> ServiceResult<H256>;

    /// Current receipt of a sent transaction. Idempotent and monotonic.
    async fn get_receipt(&self, tx: &PendingTransaction) -> ServiceResult<TxReceipt>;
}
