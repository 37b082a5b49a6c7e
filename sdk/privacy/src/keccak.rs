//! Keccak-256 backend, matching what an EVM verifier computes natively.
//!
//! ```text
//! H(domain, x_1..x_k) = keccak256(domain[32] || k[32] || x_1[32] || .. || x_k[32]) mod p
//! ```

use obscura_address::keccak256;
use obscura_field::{FIELD_BYTES, FieldElement};

use crate::scheme::{CommitmentScheme, HashDomain};

#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak256Scheme;

impl CommitmentScheme for Keccak256Scheme {
    fn name(&self) -> &'static str {
        "keccak"
    }

    fn hash(&self, domain: HashDomain, inputs: &[FieldElement]) -> FieldElement {
        let mut buf = Vec::with_capacity((inputs.len() + 2) * FIELD_BYTES);
        buf.extend_from_slice(&word(domain.tag()));
        buf.extend_from_slice(&word(inputs.len() as u64));
        for input in inputs {
            buf.extend_from_slice(&input.to_be_bytes());
        }
        FieldElement::from_be_bytes_mod_order(&keccak256(&buf))
    }
}

fn word(value: u64) -> [u8; FIELD_BYTES] {
    let mut out = [0u8; FIELD_BYTES];
    out[FIELD_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_layout() {
        let x = FieldElement::from_u64(5);
        let mut expected = Vec::new();
        expected.extend_from_slice(&word(HashDomain::AccountCommitment.tag()));
        expected.extend_from_slice(&word(1));
        expected.extend_from_slice(&x.to_be_bytes());

        let got = Keccak256Scheme.hash(HashDomain::AccountCommitment, &[x]);
        assert_eq!(got, FieldElement::from_be_bytes_mod_order(&keccak256(&expected)));
    }
}
