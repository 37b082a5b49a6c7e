//! Obscura Privacy SDK
//!
//! Client-side primitives for private perpetual trading.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Private Order                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │  Nullifier   │  │  Commitment  │  │   Encrypted Order     │  │
//! │  │  (one-time)  │  │  (hiding)    │  │   (512B, for keeper)  │  │
//! │  └──────────────┘  └──────────────┘  └───────────────────────┘  │
//! │         │                 │                     │               │
//! │         ▼                 ▼                     ▼               │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │              Ledger verifier                            │    │
//! │  │  • Nullifier not in used set                            │    │
//! │  │  • Proof over account + order commitments               │    │
//! │  │  • Ciphertext stored in a fixed 512-byte slot           │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod encryption;
mod error;
pub mod keccak;
pub mod nullifier;
pub mod order;
pub mod poseidon;
pub mod scheme;

pub use commitment::{Commitment, CommitmentEngine, commit_hash, commit_hash_raw, random_nonce};
pub use encryption::{
    ENCRYPTED_ORDER_SIZE, EncryptedOrder, KeeperPublicKey, KeeperSecret, MAX_PAYLOAD_SIZE,
    decrypt_for_keeper, encrypt_for_keeper, open_for_keeper, seal_for_keeper,
};
pub use error::PrivacyError;
pub use keccak::Keccak256Scheme;
pub use nullifier::{Nullifier, NullifierEngine, ensure_distinct};
pub use order::{OrderEnvelope, OrderFlags, OrderPayload};
pub use poseidon::PoseidonScheme;
pub use scheme::{CommitmentScheme, HashDomain, SchemeKind};
