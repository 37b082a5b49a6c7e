//! BIP39 mnemonics over the canonical 2048-word English list.
//!
//! ```text
//! entropy (128..256 bits) || SHA-256(entropy)[..bits/32]  ->  11-bit word indices
//! seed = PBKDF2-HMAC-SHA512(mnemonic, "mnemonic" || passphrase, 2048)  (64 bytes)
//! ```

use std::fmt;

use bip39::Language;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{KeychainError, Result};

pub const SEED_BYTES: usize = 64;
pub const DEFAULT_ENTROPY_BITS: usize = 256;
pub const VALID_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// A validated mnemonic phrase.
#[derive(Clone, PartialEq, Eq)]
pub struct Mnemonic(bip39::Mnemonic);

impl Mnemonic {
    /// Fresh mnemonic from OS randomness.
    pub fn generate(entropy_bits: usize) -> Result<Self> {
        Self::generate_with(&mut rand::rngs::OsRng, entropy_bits)
    }

    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R, entropy_bits: usize) -> Result<Self> {
        if !(128..=256).contains(&entropy_bits) || entropy_bits % 32 != 0 {
            return Err(KeychainError::InvalidEntropyBits(entropy_bits));
        }
        let mut entropy = Zeroizing::new(vec![0u8; entropy_bits / 8]);
        rng.fill_bytes(&mut entropy);
        Self::from_entropy(&entropy)
    }

    pub fn from_entropy(entropy: &[u8]) -> Result<Self> {
        Ok(Self(bip39::Mnemonic::from_entropy_in(Language::English, entropy)?))
    }

    /// Parse and fully validate a phrase: word count, wordlist membership,
    /// checksum. Case and surrounding whitespace are normalized.
    pub fn parse(phrase: &str) -> Result<Self> {
        let normalized = Zeroizing::new(
            phrase
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join(" "),
        );
        let count = normalized.split(' ').filter(|w| !w.is_empty()).count();
        if !VALID_WORD_COUNTS.contains(&count) {
            return Err(KeychainError::InvalidMnemonic(format!(
                "{count} words (expected 12, 15, 18, 21 or 24)"
            )));
        }
        if let Some(word) = normalized
            .split(' ')
            .find(|w| Language::English.find_word(w).is_none())
        {
            return Err(KeychainError::InvalidMnemonic(format!(
                "'{word}' is not in the wordlist"
            )));
        }
        Ok(Self(bip39::Mnemonic::parse_in_normalized(
            Language::English,
            &normalized,
        )?))
    }

    pub fn word_count(&self) -> usize {
        self.0.word_count()
    }

    pub fn words(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.words()
    }

    pub fn phrase(&self) -> Zeroizing<String> {
        Zeroizing::new(self.0.to_string())
    }

    pub fn entropy(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.0.to_entropy())
    }

    /// PBKDF2-HMAC-SHA512 seed stretch (2048 rounds).
    pub fn to_seed(&self, passphrase: &str) -> Seed {
        Seed(Zeroizing::new(self.0.to_seed(passphrase)))
    }
}

impl fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mnemonic({} words)", self.word_count())
    }
}

/// 64-byte BIP39 seed.
#[derive(Clone, PartialEq, Eq)]
pub struct Seed(Zeroizing<[u8; SEED_BYTES]>);

impl Seed {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SEED_BYTES] = bytes
            .try_into()
            .map_err(|_| KeychainError::InvalidSeedLength(bytes.len()))?;
        Ok(Self(Zeroizing::new(arr)))
    }

    pub fn as_bytes(&self) -> &[u8; SEED_BYTES] {
        &self.0
    }

    /// SHA-256 of the seed, safe to compare or log.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_slice()).into()
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed(sha256={})", hex::encode(&self.digest()[..8]))
    }
}
