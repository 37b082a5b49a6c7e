//! Account and Order Commitments
//!
//! ```text
//! AccountCommitment = H("obs:acct", secret, nonce)
//! OrderCommitment   = H("obs:ordc", H("obs:ordp", order_words[7]), nonce)
//! CommitHash        = keccak256(commitment[32] || nonce[32] || address[20])
//! ```
//!
//! `CommitHash` is what the ledger recomputes with
//! `keccak256(abi.encodePacked(bytes32, uint256, address))` when a trading
//! account is revealed, so its byte layout is fixed.

use std::fmt;
use std::sync::Arc;

use obscura_address::{ADDRESS_BYTES, Address, AddressError, keccak256_concat};
use obscura_field::FieldElement;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::PrivacyError;
use crate::order::OrderPayload;
use crate::scheme::{CommitmentScheme, HashDomain, SchemeKind};

/// A commitment (32 bytes, big-endian field element)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Commitment(pub [u8; 32]);

impl Commitment {
    /// Create commitment from field element
    pub fn from_field(f: &FieldElement) -> Self {
        Self(f.to_be_bytes())
    }

    /// Convert to field element
    pub fn to_field(&self) -> FieldElement {
        FieldElement::from_be_bytes_mod_order(&self.0)
    }

    /// Strict decoding; the bytes must already be a reduced field element.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrivacyError> {
        let f = FieldElement::from_be_bytes(bytes)?;
        Ok(Self::from_field(&f))
    }

    pub fn from_hex(s: &str) -> Result<Self, PrivacyError> {
        let f = FieldElement::from_hex_canonical(s)?;
        Ok(Self::from_field(&f))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", self.to_hex())
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Commitment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Commitment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Builds account and order commitments over a pluggable hash.
#[derive(Debug, Clone)]
pub struct CommitmentEngine {
    scheme: Arc<dyn CommitmentScheme>,
}

impl CommitmentEngine {
    pub fn new(scheme: Arc<dyn CommitmentScheme>) -> Self {
        Self { scheme }
    }

    pub fn with_kind(kind: SchemeKind) -> Self {
        Self::new(kind.build())
    }

    pub fn scheme(&self) -> &Arc<dyn CommitmentScheme> {
        &self.scheme
    }

    /// Commit to a trading-account secret.
    pub fn account_commitment(&self, secret_key: &FieldElement, nonce: &FieldElement) -> Commitment {
        let c = self.scheme.hash(
            HashDomain::AccountCommitment,
            &[secret_key.clone(), nonce.clone()],
        );
        Commitment::from_field(&c)
    }

    /// Commit to an order: the canonical words are digested first, then
    /// bound to the nonce.
    pub fn order_commitment(&self, order: &OrderPayload, nonce: &FieldElement) -> Commitment {
        let digest = self
            .scheme
            .hash(HashDomain::OrderPayload, &order.to_field_elements());
        let c = self
            .scheme
            .hash(HashDomain::OrderCommitment, &[digest, nonce.clone()]);
        Commitment::from_field(&c)
    }
}

impl Default for CommitmentEngine {
    fn default() -> Self {
        Self::with_kind(SchemeKind::default())
    }
}

/// Generate a random commitment nonce
pub fn random_nonce<R: RngCore + ?Sized>(rng: &mut R) -> FieldElement {
    FieldElement::random(rng)
}

/// `keccak256(commitment || nonce || address)`, as the ledger computes it.
pub fn commit_hash(commitment: &Commitment, nonce: &FieldElement, address: &Address) -> [u8; 32] {
    keccak256_concat(&[
        commitment.as_bytes(),
        &nonce.to_be_bytes(),
        address.as_bytes(),
    ])
}

/// Byte-level entry point for `commit_hash` with full input validation.
pub fn commit_hash_raw(
    commitment: &[u8],
    nonce: &[u8],
    address: &[u8],
) -> Result<[u8; 32], PrivacyError> {
    if address.len() != ADDRESS_BYTES {
        return Err(AddressError::InvalidLength(address.len()).into());
    }
    let commitment = Commitment::from_slice(commitment)?;
    let nonce = FieldElement::from_be_bytes(nonce)?;
    let address = Address::from_slice(address)?;
    Ok(commit_hash(&commitment, &nonce, &address))
}
