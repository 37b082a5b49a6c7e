//! Swappable hash backend for commitments and nullifiers.
//!
//! The arithmetization verified by the eventual circuit decides which scheme
//! is deployed, so engines only ever see `dyn CommitmentScheme`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use obscura_field::FieldElement;
use serde::{Deserialize, Serialize};

use crate::keccak::Keccak256Scheme;
use crate::poseidon::PoseidonScheme;

/// Domain separation tags. Each is 8 ASCII bytes read as a big-endian u64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashDomain {
    AccountCommitment,
    OrderPayload,
    OrderCommitment,
    OrderNullifier,
    AccountNullifier,
    BatchNullifier,
    NullifierOuter,
}

impl HashDomain {
    pub const fn tag(self) -> u64 {
        let bytes = match self {
            HashDomain::AccountCommitment => b"obs:acct",
            HashDomain::OrderPayload => b"obs:ordp",
            HashDomain::OrderCommitment => b"obs:ordc",
            HashDomain::OrderNullifier => b"obs:ornf",
            HashDomain::AccountNullifier => b"obs:acnf",
            HashDomain::BatchNullifier => b"obs:btnf",
            HashDomain::NullifierOuter => b"obs:nout",
        };
        u64::from_be_bytes(*bytes)
    }

    pub fn as_field(self) -> FieldElement {
        FieldElement::from_u64(self.tag())
    }
}

/// A collision-resistant hash from field elements to a field element.
pub trait CommitmentScheme: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Hash `inputs` under `domain`. Implementations must bind the domain
    /// and the number of inputs.
    fn hash(&self, domain: HashDomain, inputs: &[FieldElement]) -> FieldElement;
}

/// Configured choice of scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemeKind {
    #[default]
    Poseidon,
    Keccak,
}

impl SchemeKind {
    pub fn build(self) -> Arc<dyn CommitmentScheme> {
        match self {
            SchemeKind::Poseidon => Arc::new(PoseidonScheme::new()),
            SchemeKind::Keccak => Arc::new(Keccak256Scheme),
        }
    }
}

impl FromStr for SchemeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "poseidon" => Ok(SchemeKind::Poseidon),
            "keccak" | "keccak256" => Ok(SchemeKind::Keccak),
            other => Err(format!("unknown commitment scheme: {other}")),
        }
    }
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemeKind::Poseidon => f.write_str("poseidon"),
            SchemeKind::Keccak => f.write_str("keccak"),
        }
    }
}
