//! Ledger contract interface
//!
//! ```text
//! deposit(amount)                                   withdraw(amount, nullifier, proof)
//! commitTradingAccount(commitHash)                  revealTradingAccount(commitment, nonce, proof)
//! submitOrderPrivate(proof, nullifier, accountCommitment, orderCommitment, encryptedOrder)
//! usedNullifiers(nullifier) -> bool                 isOrderValid(nullifier) -> bool
//! keepers(address) -> KeeperInfo                    activeKeeperList(index) -> address
//! ```
//!
//! Writes are signed with the sending account's own key and resolve once the
//! transaction is mined; a reverted transaction is an error.

pub mod abi;
pub mod memory;
pub mod rpc;

use std::fmt;

use async_trait::async_trait;
use obscura_address::Address;
use obscura_field::FieldElement;
use k256::SecretKey;
use obscura_privacy::{Commitment, EncryptedOrder, Nullifier};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::prover::Proof;

pub use memory::InMemoryLedger;
pub use rpc::RpcLedger;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(#[serde(with = "hex")] pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

/// A mined, successful transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// On-chain keeper registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeeperInfo {
    /// SEC1 encryption key as registered; may be malformed.
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
    pub reputation_score: u64,
    pub successful_batches: u64,
    pub failed_batches: u64,
    pub is_active: bool,
    pub is_slashed: bool,
}

/// Arguments of `submitOrderPrivate`.
#[derive(Debug, Clone)]
pub struct PrivateOrderSubmission {
    pub proof: Proof,
    pub nullifier: Nullifier,
    pub account_commitment: Commitment,
    pub order_commitment: Commitment,
    pub encrypted_order: EncryptedOrder,
}

/// The ledger contract as seen by the client. Writes are signed by `signer`,
/// whose address is the transaction sender.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current chain head.
    async fn block_number(&self) -> LedgerResult<u64>;

    async fn deposit(&self, signer: &SecretKey, amount: u128) -> LedgerResult<Receipt>;

    /// The contract records `nullifier` as spent; a second withdrawal with
    /// the same one fails with [`LedgerError::NullifierUsed`].
    async fn withdraw(
        &self,
        signer: &SecretKey,
        amount: u128,
        nullifier: &Nullifier,
        proof: &Proof,
    ) -> LedgerResult<Receipt>;

    async fn commit_trading_account(
        &self,
        signer: &SecretKey,
        commit_hash: &[u8; 32],
    ) -> LedgerResult<Receipt>;

    async fn reveal_trading_account(
        &self,
        signer: &SecretKey,
        commitment: &Commitment,
        nonce: &FieldElement,
        proof: &Proof,
    ) -> LedgerResult<Receipt>;

    async fn submit_order_private(
        &self,
        signer: &SecretKey,
        submission: &PrivateOrderSubmission,
    ) -> LedgerResult<Receipt>;

    async fn used_nullifiers(&self, nullifier: &Nullifier) -> LedgerResult<bool>;

    async fn is_order_valid(&self, nullifier: &Nullifier) -> LedgerResult<bool>;

    async fn keepers(&self, keeper: &Address) -> LedgerResult<KeeperInfo>;

    /// `None` past the end of the active list.
    async fn active_keeper_list(&self, index: u64) -> LedgerResult<Option<Address>>;
}
