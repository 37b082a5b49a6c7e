//! Poseidon over the BN254 scalar field.
//!
//! ```text
//! H(domain, x_1..x_k) = Poseidon(domain, k, x_1, .., x_k)
//! ```

use std::fmt;
use std::sync::OnceLock;

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge},
};
use ark_ff::{BigInteger, PrimeField};
use obscura_field::FieldElement;

use crate::scheme::{CommitmentScheme, HashDomain};

#[derive(Clone, Copy)]
pub struct PoseidonScheme {
    config: &'static PoseidonConfig<Fr>,
}

impl fmt::Debug for PoseidonScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoseidonScheme")
            .field("full_rounds", &self.config.full_rounds)
            .field("partial_rounds", &self.config.partial_rounds)
            .field("rate", &self.config.rate)
            .finish()
    }
}

impl PoseidonScheme {
    pub fn new() -> Self {
        Self {
            config: poseidon_config(),
        }
    }
}

impl Default for PoseidonScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitmentScheme for PoseidonScheme {
    fn name(&self) -> &'static str {
        "poseidon"
    }

    fn hash(&self, domain: HashDomain, inputs: &[FieldElement]) -> FieldElement {
        let mut sponge = PoseidonSponge::new(self.config);

        sponge.absorb(&Fr::from(domain.tag()));
        sponge.absorb(&Fr::from(inputs.len() as u64));
        for input in inputs {
            sponge.absorb(&to_fr(input));
        }

        let result: Fr = sponge.squeeze_field_elements(1)[0];
        from_fr(result)
    }
}

fn to_fr(x: &FieldElement) -> Fr {
    Fr::from_be_bytes_mod_order(&x.to_be_bytes())
}

fn from_fr(f: Fr) -> FieldElement {
    FieldElement::from_be_bytes_mod_order(&f.into_bigint().to_bytes_be())
}

/// Poseidon configuration for Obscura
///
/// Field: BN254 Fr (254 bits)
/// Rate: 2, Capacity: 1
/// Security: 128 bits
fn poseidon_config() -> &'static PoseidonConfig<Fr> {
    use ark_crypto_primitives::sponge::poseidon::find_poseidon_ark_and_mds;

    static CONFIG: OnceLock<PoseidonConfig<Fr>> = OnceLock::new();
    CONFIG.get_or_init(|| {
        let prime_bits: u64 = 254;
        let rate: usize = 2;
        let capacity: usize = 1;
        let full_rounds: u64 = 8;
        let partial_rounds: u64 = 57;
        let alpha: u64 = 5;
        let skip_matrices: u64 = 0;

        let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
            prime_bits,
            rate,
            full_rounds,
            partial_rounds,
            skip_matrices,
        );

        PoseidonConfig::new(
            full_rounds as usize,
            partial_rounds as usize,
            alpha,
            mds,
            ark,
            rate,
            capacity,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use obscura_field::modulus;

    #[test]
    fn test_field_bridge_roundtrip() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let x = FieldElement::random(&mut rng);
            assert_eq!(from_fr(to_fr(&x)), x);
        }
    }

    #[test]
    fn test_poseidon_deterministic() {
        let scheme = PoseidonScheme::new();
        let inputs = [FieldElement::from_u64(7), FieldElement::from_u64(9)];
        let h1 = scheme.hash(HashDomain::AccountCommitment, &inputs);
        let h2 = PoseidonScheme::new().hash(HashDomain::AccountCommitment, &inputs);
        assert_eq!(h1, h2, "same inputs should produce same hash");
        assert!(h1.value() < modulus());
    }

    #[test]
    fn test_poseidon_order_sensitive() {
        let scheme = PoseidonScheme::new();
        let a = FieldElement::from_u64(1);
        let b = FieldElement::from_u64(2);
        assert_ne!(
            scheme.hash(HashDomain::OrderPayload, &[a.clone(), b.clone()]),
            scheme.hash(HashDomain::OrderPayload, &[b, a]),
            "input order must matter"
        );
    }
}
