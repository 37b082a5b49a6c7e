//! Obscura keychain
//!
//! Deterministic key hierarchy for trading accounts.
//!
//! ```text
//! mnemonic ──PBKDF2-SHA512──▶ seed ──HMAC-SHA512──▶ master
//!                                                     │
//!                                   m/44'/60'/i'/0/j  ▼
//!                                                  account i, address j
//! ```
//!
//! The seed is sealed at rest with a password (see [`vault`]).

pub mod account;
mod error;
pub mod hd;
pub mod mnemonic;
pub mod vault;
pub mod wallet;

pub use account::Account;
pub use error::{KeychainError, Result};
pub use hd::{ChildNumber, DerivationPath, HARDENED_OFFSET, HdNode, address_of};
pub use mnemonic::{DEFAULT_ENTROPY_BITS, Mnemonic, SEED_BYTES, Seed};
pub use vault::{
    DEFAULT_KDF_ITERATIONS, EncryptedSeedRecord, KdfParams, RecordKind, open_legacy_key,
    open_seed, seal_legacy_key, seal_seed,
};
pub use wallet::{HdWallet, WalletState};
