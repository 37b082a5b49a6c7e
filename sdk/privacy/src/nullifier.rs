//! Nullifiers
//!
//! Nullifiers prevent the same order or withdrawal from being spent twice.
//!
//! ```text
//! inner     = H(domain, secret, commitment, nonce)
//! Nullifier = H("obs:nout", inner, domain)
//! ```
//!
//! Properties:
//! - Deterministic: same (secret, commitment, nonce) -> same nullifier
//! - Unlinkable: cannot link a nullifier to its commitment without the secret
//! - Context-bound: order, account and batch nullifiers never coincide

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use obscura_field::FieldElement;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::PrivacyError;
use crate::commitment::Commitment;
use crate::scheme::{CommitmentScheme, HashDomain, SchemeKind};

/// A nullifier (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    pub fn from_field(f: &FieldElement) -> Self {
        Self(f.to_be_bytes())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrivacyError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            PrivacyError::InvalidNullifier(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Parse 64 hex digits, optionally `0x`-prefixed.
    pub fn from_hex(s: &str) -> Result<Self, PrivacyError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.len() != 64 {
            return Err(PrivacyError::InvalidNullifier(format!(
                "expected 64 hex digits, got {}",
                digits.len()
            )));
        }
        let bytes =
            hex::decode(digits).map_err(|e| PrivacyError::InvalidNullifier(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Nullifier {
    type Err = PrivacyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nullifier({})", self.to_hex())
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Nullifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Nullifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Derives nullifiers for each spend context.
#[derive(Debug, Clone)]
pub struct NullifierEngine {
    scheme: Arc<dyn CommitmentScheme>,
}

impl NullifierEngine {
    pub fn new(scheme: Arc<dyn CommitmentScheme>) -> Self {
        Self { scheme }
    }

    pub fn with_kind(kind: SchemeKind) -> Self {
        Self::new(kind.build())
    }

    /// Nullifier consumed when an order is submitted.
    pub fn order_nullifier(
        &self,
        secret_key: &FieldElement,
        order_commitment: &Commitment,
        nonce: &FieldElement,
    ) -> Nullifier {
        self.derive(HashDomain::OrderNullifier, secret_key, order_commitment, nonce)
    }

    /// Nullifier consumed by a withdrawal from a trading account.
    pub fn account_nullifier(
        &self,
        secret_key: &FieldElement,
        account_commitment: &Commitment,
        nonce: &FieldElement,
    ) -> Nullifier {
        self.derive(
            HashDomain::AccountNullifier,
            secret_key,
            account_commitment,
            nonce,
        )
    }

    /// Nullifier for a settled batch, keyed by the settling party's secret.
    pub fn batch_nullifier(
        &self,
        secret_key: &FieldElement,
        batch_commitment: &Commitment,
        batch_nonce: &FieldElement,
    ) -> Nullifier {
        self.derive(
            HashDomain::BatchNullifier,
            secret_key,
            batch_commitment,
            batch_nonce,
        )
    }

    fn derive(
        &self,
        domain: HashDomain,
        secret_key: &FieldElement,
        commitment: &Commitment,
        nonce: &FieldElement,
    ) -> Nullifier {
        let inner = self.scheme.hash(
            domain,
            &[secret_key.clone(), commitment.to_field(), nonce.clone()],
        );
        let outer = self
            .scheme
            .hash(HashDomain::NullifierOuter, &[inner, domain.as_field()]);
        Nullifier::from_field(&outer)
    }
}

impl Default for NullifierEngine {
    fn default() -> Self {
        Self::with_kind(SchemeKind::default())
    }
}

/// Reject batches that would spend the same nullifier twice.
pub fn ensure_distinct(nullifiers: &[Nullifier]) -> Result<(), PrivacyError> {
    let mut seen = HashSet::with_capacity(nullifiers.len());
    for n in nullifiers {
        if !seen.insert(n) {
            return Err(PrivacyError::DuplicateNullifier(n.to_hex()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn commitment(v: u64) -> Commitment {
        Commitment::from_field(&FieldElement::from_u64(v))
    }

    #[test]
    fn test_nullifier_deterministic() {
        let engine = NullifierEngine::default();
        let secret = FieldElement::from_u64(1);
        let nonce = FieldElement::from_u64(100);

        let n1 = engine.order_nullifier(&secret, &commitment(2), &nonce);
        let n2 = engine.order_nullifier(&secret, &commitment(2), &nonce);

        assert_eq!(n1, n2, "same inputs should produce same nullifier");
    }

    #[test]
    fn test_nullifier_unique_per_order() {
        let engine = NullifierEngine::default();
        let secret = FieldElement::from_u64(1);
        let nonce = FieldElement::zero();

        let n1 = engine.order_nullifier(&secret, &commitment(1), &nonce);
        let n2 = engine.order_nullifier(&secret, &commitment(2), &nonce);

        assert_ne!(n1, n2, "different orders should have different nullifiers");
    }

    #[test]
    fn test_nullifier_requires_key() {
        let engine = NullifierEngine::default();
        let nonce = FieldElement::zero();

        let n1 = engine.order_nullifier(&FieldElement::from_u64(1), &commitment(3), &nonce);
        let n2 = engine.order_nullifier(&FieldElement::from_u64(2), &commitment(3), &nonce);

        assert_ne!(n1, n2, "different keys should produce different nullifiers");
    }

    #[test]
    fn test_contexts_do_not_collide() {
        for kind in [SchemeKind::Poseidon, SchemeKind::Keccak] {
            let engine = NullifierEngine::with_kind(kind);
            let s = FieldElement::from_u64(5);
            let c = commitment(6);
            let n = FieldElement::from_u64(7);

            let order = engine.order_nullifier(&s, &c, &n);
            let account = engine.account_nullifier(&s, &c, &n);
            let batch = engine.batch_nullifier(&s, &c, &n);
            assert_ne!(order, account);
            assert_ne!(order, batch);
            assert_ne!(account, batch);
        }
    }

    #[test]
    fn test_hex_validation() {
        let n = NullifierEngine::default().order_nullifier(
            &FieldElement::from_u64(1),
            &commitment(2),
            &FieldElement::from_u64(3),
        );
        assert_eq!(Nullifier::from_hex(&n.to_hex()).unwrap(), n);
        assert_eq!(n.to_hex()[2..].parse::<Nullifier>().unwrap(), n);

        assert!(matches!(
            Nullifier::from_hex("0x1234"),
            Err(PrivacyError::InvalidNullifier(_))
        ));
        assert!(matches!(
            Nullifier::from_hex(&format!("0x{}", "g".repeat(64))),
            Err(PrivacyError::InvalidNullifier(_))
        ));
        assert!(Nullifier::from_hex(&format!("0x{}", "a".repeat(66))).is_err());
        assert!(Nullifier::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_ensure_distinct() {
        let a = Nullifier([1u8; 32]);
        let b = Nullifier([2u8; 32]);
        assert!(ensure_distinct(&[]).is_ok());
        assert!(ensure_distinct(&[a, b]).is_ok());
        assert!(matches!(
            ensure_distinct(&[a, b, a]),
            Err(PrivacyError::DuplicateNullifier(_))
        ));
    }

    fn collision_sweep(count: usize) {
        let engine = NullifierEngine::with_kind(SchemeKind::Keccak);
        let mut rng = rand::thread_rng();
        let mut seen = HashSet::with_capacity(count);
        for _ in 0..count {
            let secret = FieldElement::random(&mut rng);
            let c = Commitment::from_field(&FieldElement::random(&mut rng));
            let nonce = FieldElement::from_u64(rng.next_u64());
            assert!(
                seen.insert(engine.order_nullifier(&secret, &c, &nonce)),
                "nullifier collision"
            );
        }
    }

    #[test]
    fn test_no_collisions_sampled() {
        collision_sweep(10_000);
    }

    #[test]
    #[ignore = "one million derivations; run with --ignored"]
    fn test_no_collisions_million() {
        collision_sweep(1_000_000);
    }
}
