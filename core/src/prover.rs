//! Prover boundary
//!
//! The circuits themselves live outside this crate. The client only needs a
//! way to turn public inputs into an opaque proof blob the ledger accepts.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  reveal    : commitment, nonce, committer                       │
//! │  order     : account commitment, order commitment, nullifier    │
//! │  withdraw  : account commitment, nullifier, amount, recipient   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use obscura_address::Address;
use obscura_field::FieldElement;
use obscura_privacy::{Commitment, Nullifier};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

pub const MOCK_PROOF_SIZE: usize = 256;

/// Opaque proof bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof(#[serde(with = "hex")] pub Vec<u8>);

impl Proof {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.0[..self.0.len().min(8)];
        write!(f, "Proof({} bytes, {}..)", self.0.len(), hex::encode(head))
    }
}

#[derive(Debug, Clone)]
pub struct RevealInputs {
    pub commitment: Commitment,
    pub nonce: FieldElement,
    pub committer: Address,
}

#[derive(Debug, Clone)]
pub struct OrderInputs {
    pub account_commitment: Commitment,
    pub order_commitment: Commitment,
    pub nullifier: Nullifier,
}

#[derive(Debug, Clone)]
pub struct WithdrawInputs {
    pub account_commitment: Commitment,
    pub nullifier: Nullifier,
    pub amount: u128,
    pub recipient: Address,
}

/// Trait for ZK proof generation. Implementations are CPU bound and are
/// called from `spawn_blocking`.
pub trait Prover: Send + Sync {
    fn prove_reveal(&self, inputs: &RevealInputs) -> Result<Proof>;

    fn prove_order(&self, inputs: &OrderInputs) -> Result<Proof>;

    fn prove_withdraw(&self, inputs: &WithdrawInputs) -> Result<Proof>;

    /// Verification key hash the ledger is expected to hold.
    fn verification_key_hash(&self) -> [u8; 32];
}

/// Deterministic stand-in for the real circuits.
///
/// A proof is the blake3 transcript of the circuit label and public inputs,
/// zero padded to [`MOCK_PROOF_SIZE`] bytes.
pub struct MockProver {
    vk_hash: [u8; 32],
}

impl MockProver {
    pub fn new() -> Self {
        Self {
            vk_hash: *blake3::hash(b"obscura-mock-vk-v1").as_bytes(),
        }
    }

    fn transcript(&self, label: &[u8], parts: &[&[u8]]) -> Proof {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.vk_hash);
        hasher.update(label);
        for part in parts {
            hasher.update(&(part.len() as u32).to_be_bytes());
            hasher.update(part);
        }

        let mut proof_bytes = Vec::with_capacity(MOCK_PROOF_SIZE);
        proof_bytes.extend_from_slice(hasher.finalize().as_bytes());
        proof_bytes.resize(MOCK_PROOF_SIZE, 0);
        Proof(proof_bytes)
    }

    /// Recompute and compare.
    pub fn verify_reveal(&self, inputs: &RevealInputs, proof: &Proof) -> bool {
        matches!(self.prove_reveal(inputs), Ok(p) if p == *proof)
    }
}

impl Default for MockProver {
    fn default() -> Self {
        Self::new()
    }
}

impl Prover for MockProver {
    fn prove_reveal(&self, inputs: &RevealInputs) -> Result<Proof> {
        Ok(self.transcript(
            b"reveal",
            &[
                inputs.commitment.as_bytes(),
                &inputs.nonce.to_be_bytes(),
                inputs.committer.as_bytes(),
            ],
        ))
    }

    fn prove_order(&self, inputs: &OrderInputs) -> Result<Proof> {
        Ok(self.transcript(
            b"order",
            &[
                inputs.account_commitment.as_bytes(),
                inputs.order_commitment.as_bytes(),
                inputs.nullifier.as_bytes(),
            ],
        ))
    }

    fn prove_withdraw(&self, inputs: &WithdrawInputs) -> Result<Proof> {
        if inputs.amount == 0 {
            return Err(ClientError::Validation("withdrawal amount is zero".into()));
        }
        Ok(self.transcript(
            b"withdraw",
            &[
                inputs.account_commitment.as_bytes(),
                inputs.nullifier.as_bytes(),
                &inputs.amount.to_be_bytes(),
                inputs.recipient.as_bytes(),
            ],
        ))
    }

    fn verification_key_hash(&self) -> [u8; 32] {
        self.vk_hash
    }
}

/// Run CPU-bound work (proving, key stretching) off the async executor.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ClientError::State(format!("blocking task failed: {e}")))?
}
