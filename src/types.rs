use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain separator mixed into address derivation.
const ADDRESS_DOMAIN: &[u8] = b"tx-submitter/account-address";

/// Draw a uniformly random 32-byte field value.
pub fn random_field<R: RngCore + ?Sized>(rng: &mut R) -> H256 {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    H256::from(bytes)
}

/// Key material and derived address of an account.
///
/// The address is computed once from `(secret_key, partial_address)` and the
/// fields are private, so an identity can't change after construction.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AccountIdentity {
    #[serde(skip)]
    secret_key: H256,
    partial_address: H256,
    address: H256,
}

impl AccountIdentity {
    pub fn from_secret_and_partial(secret_key: H256, partial_address: H256) -> Self {
        let address = derive_address(&secret_key, &partial_address);
        Self {
            secret_key,
            partial_address,
            address,
        }
    }

    /// Build an identity from two independent random draws.
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let secret_key = random_field(rng);
        let partial_address = random_field(rng);
        Self::from_secret_and_partial(secret_key, partial_address)
    }

    pub fn secret_key(&self) -> H256 {
        self.secret_key
    }

    pub fn partial_address(&self) -> H256 {
        self.partial_address
    }

    pub fn address(&self) -> H256 {
        self.address
    }
}

// The secret key must never end up in logs.
impl fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("partial_address", &self.partial_address)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Address = keccak256(domain || secret_key || partial_address)
pub fn derive_address(secret_key: &H256, partial_address: &H256) -> H256 {
    let mut data = Vec::with_capacity(ADDRESS_DOMAIN.len() + 64);
    data.extend_from_slice(ADDRESS_DOMAIN);
    data.extend_from_slice(secret_key.as_bytes());
    data.extend_from_slice(partial_address.as_bytes());
    H256::from(keccak256(data))
}

/// Registration policy applied to every account deployment.
///
/// Skipping class registration and public deployment while allowing a
/// universal deploy is the fast bootstrap path used for load generation.
/// No `Default`; callers pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPolicy {
    pub skip_class_registration: bool,
    pub skip_public_deployment: bool,
    pub universal_deploy: bool,
}

impl DeploymentPolicy {
    /// Skip class registration and public deployment, deploy universally.
    pub fn bootstrap() -> Self {
        Self {
            skip_class_registration: true,
            skip_public_deployment: true,
            universal_deploy: true,
        }
    }

    /// Register the class, deploy publicly, bind to the deployer.
    pub fn full() -> Self {
        Self {
            skip_class_registration: false,
            skip_public_deployment: false,
            universal_deploy: false,
        }
    }
}

/// Options passed to the service when building a deployment template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOptions {
    pub policy: DeploymentPolicy,
    pub salt: H256,
}

/// Unproved description of an account deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTemplate {
    pub account: H256,
    pub options: DeploymentOptions,
}

/// Deployment template with a validity proof attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvedTemplate {
    pub template: DeploymentTemplate,
    pub proof: Vec<u8>,
}

/// A function call against an already deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    /// Registered account the call is sent from; `None` for the default sender.
    pub from: Option<H256>,
    pub contract: Address,
    pub function: String,
    pub args: Vec<U256>,
}

/// Anything that can be handed to `PxeService::send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxRequest {
    Deployment(ProvedTemplate),
    Call(ContractCall),
}

/// Opaque handle for a transaction the service accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingTransaction {
    id: u64,
}

impl PendingTransaction {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Transaction status as reported by the service.
///
/// Only `Pending` is non-terminal. Statuses only move forward:
/// `Pending` first, then exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Reverted,
    Dropped,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    /// Whether a receipt may report `self` after having reported `previous`.
    pub fn may_follow(&self, previous: TxStatus) -> bool {
        if previous.is_terminal() {
            *self == previous
        } else {
            true
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxStatus::Pending => "pending",
            TxStatus::Success => "success",
            TxStatus::Reverted => "reverted",
            TxStatus::Dropped => "dropped",
        };
        f.write_str(name)
    }
}

/// The service's report of a transaction's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub status: TxStatus,
    /// Empty when there is no error.
    pub error: String,
}

impl TxReceipt {
    pub fn pending() -> Self {
        Self {
            status: TxStatus::Pending,
            error: String::new(),
        }
    }

    pub fn is_clean_pending(&self) -> bool {
        self.status == TxStatus::Pending && self.error.is_empty()
    }
}

/// A transaction that was sent and acknowledged as pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentTransaction {
    pub index: usize,
    pub handle: PendingTransaction,
    pub hash: H256,
    pub receipt: TxReceipt,
    /// Identity deployed by this transaction, for account deployments.
    pub account: Option<AccountIdentity>,
    pub submitted_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_address_is_pure_function_of_keys() {
        let secret = H256::repeat_byte(0x11);
        let partial = H256::repeat_byte(0x22);

        let a = AccountIdentity::from_secret_and_partial(secret, partial);
        let b = AccountIdentity::from_secret_and_partial(secret, partial);
        assert_eq!(a.address(), b.address());
        assert_eq!(a.address(), derive_address(&secret, &partial));

        let c = AccountIdentity::from_secret_and_partial(secret, H256::repeat_byte(0x23));
        assert_ne!(a.address(), c.address());
    }

    #[test]
    fn test_random_identities_differ() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = AccountIdentity::random(&mut rng);
        let b = AccountIdentity::random(&mut rng);
        assert_ne!(a.address(), b.address());
        assert_ne!(a.secret_key(), a.partial_address());
    }

    #[test]
    fn test_debug_hides_secret_key() {
        let identity =
            AccountIdentity::from_secret_and_partial(H256::repeat_byte(0xab), H256::zero());
        let printed = format!("{identity:?}");
        assert!(!printed.contains("abababababababab"));
        assert!(printed.contains("address"));
    }

    #[test]
    fn test_status_monotonicity() {
        assert!(TxStatus::Pending.may_follow(TxStatus::Pending));
        assert!(TxStatus::Success.may_follow(TxStatus::Pending));
        assert!(TxStatus::Success.may_follow(TxStatus::Success));
        assert!(!TxStatus::Pending.may_follow(TxStatus::Success));
        assert!(!TxStatus::Reverted.may_follow(TxStatus::Success));
    }

    #[test]
    fn test_clean_pending_receipt() {
        assert!(TxReceipt::pending().is_clean_pending());
        let receipt = TxReceipt {
            status: TxStatus::Pending,
            error: "bad nonce".to_string(),
        };
        assert!(!receipt.is_clean_pending());
    }
}
