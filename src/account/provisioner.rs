use crate::{
    error::{ServiceResult, SubmitResult},
    service::PxeService,
    submit::TransactionSubmitter,
    types::{
        AccountIdentity, DeploymentOptions, DeploymentPolicy, SentTransaction, TxRequest,
        random_field,
    },
};
use ethers::types::H256;
use rand::RngCore;
use std::sync::Arc;
use tracing::debug;

/// Randomness drawn for one account, before any service call is made.
#[derive(Debug, Clone)]
pub struct AccountDraw {
    pub identity: AccountIdentity,
    pub salt: H256,
}

impl AccountDraw {
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let identity = AccountIdentity::random(rng);
        let salt = random_field(rng);
        Self { identity, salt }
    }
}

/// Creates fresh accounts and deploys them through the service.
#[derive(Clone)]
pub struct AccountProvisioner {
    service: Arc<dyn PxeService>,
    submitter: TransactionSubmitter,
    policy: DeploymentPolicy,
}

impl AccountProvisioner {
    pub fn new(service: Arc<dyn PxeService>, policy: DeploymentPolicy) -> Self {
        let submitter = TransactionSubmitter::new(service.clone());
        Self {
            service,
            submitter,
            policy,
        }
    }

    pub fn policy(&self) -> DeploymentPolicy {
        self.policy
    }

    /// Register `identity` with the service, without deploying it.
    pub async fn register(&self, identity: &AccountIdentity) -> ServiceResult<()> {
        self.service
            .register_account(identity.secret_key(), identity.partial_address())
            .await
    }

    /// Draw a new identity from `rng`, register it and send its deployment.
    ///
    /// The returned transaction carries the identity in `account`.
    pub async fn provision_and_deploy<R: RngCore + ?Sized>(
        &self,
        rng: &mut R,
    ) -> SubmitResult<(AccountIdentity, SentTransaction)> {
        let draw = AccountDraw::random(rng);
        self.deploy(0, draw).await
    }

    /// Register and deploy an already drawn account as batch item `index`.
    ///
    /// Service errors are returned as they are; this never produces a
    /// cancellation error.
    pub async fn deploy(
        &self,
        index: usize,
        draw: AccountDraw,
    ) -> SubmitResult<(AccountIdentity, SentTransaction)> {
        let AccountDraw { identity, salt } = draw;

        self.register(&identity).await?;

        let options = DeploymentOptions {
            policy: self.policy,
            salt,
        };
        let template = self.service.build_deployment(&identity, options).await?;
        let proved = self.service.attach_proof(template).await?;
        debug!(index, address = ?identity.address(), "Deployment proved");

        let handle = self.service.send(TxRequest::Deployment(proved)).await?;
        let mut sent = self.submitter.confirm_pending(index, handle).await?;
        sent.account = Some(identity.clone());

        Ok((identity, sent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ServiceError, SubmitError};
    use crate::service::{LocalPxe, LocalPxeConfig};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn provisioner() -> (Arc<LocalPxe>, AccountProvisioner) {
        let pxe = Arc::new(LocalPxe::new(LocalPxeConfig::default()));
        let provisioner = AccountProvisioner::new(pxe.clone(), DeploymentPolicy::bootstrap());
        (pxe, provisioner)
    }

    #[tokio::test]
    async fn test_independent_draws_give_distinct_accounts() {
        let (pxe, provisioner) = provisioner();
        let mut rng = StdRng::seed_from_u64(42);

        let (first, first_tx) = provisioner.provision_and_deploy(&mut rng).await.unwrap();
        let (second, second_tx) = provisioner.provision_and_deploy(&mut rng).await.unwrap();

        assert_ne!(first.address(), second.address());
        assert_ne!(first_tx.hash, second_tx.hash);
        assert!(first_tx.receipt.is_clean_pending());
        assert_eq!(first_tx.account.as_ref().map(|a| a.address()), Some(first.address()));
        assert_eq!(pxe.registered_accounts().await, 2);
    }

    #[tokio::test]
    async fn test_deploying_same_draw_twice_is_rejected() {
        let (_pxe, provisioner) = provisioner();
        let draw = AccountDraw::random(&mut StdRng::seed_from_u64(1));

        provisioner.deploy(0, draw.clone()).await.unwrap();
        let err = provisioner.deploy(1, draw).await.unwrap_err();
        assert!(matches!(err, SubmitError::Service(ServiceError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_service_failure_propagates_unchanged() {
        let (pxe, provisioner) = provisioner();
        pxe.set_unavailable("connection refused").await;

        let err = provisioner
            .provision_and_deploy(&mut StdRng::seed_from_u64(3))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SubmitError::Service(ServiceError::Unavailable("connection refused".to_string()))
        );
    }
}
