//! Password-sealed key material.
//!
//! ```text
//! key    = PBKDF2-HMAC-SHA256(password, salt[16], iterations) -> 32 bytes
//! record = AES-256-GCM(key, iv[12], plaintext, aad = record type)
//! ```
//!
//! Records serialize as JSON:
//! `{"encryptedSeed": hex, "iv": hex, "salt": hex, "version": 1, "type": "hd_seed"}`.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use k256::SecretKey;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{KeychainError, Result};
use crate::mnemonic::Seed;

pub const VAULT_VERSION: u32 = 1;
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
pub const SALT_BYTES: usize = 16;
pub const IV_BYTES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl KdfParams {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    fn derive_key(&self, password: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        if self.iterations == 0 {
            return Err(KeychainError::MalformedRecord("zero kdf iterations".into()));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, self.iterations, &mut key[..]);
        Ok(key)
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    HdSeed,
    LegacyKey,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::HdSeed => "hd_seed",
            RecordKind::LegacyKey => "legacy_key",
        }
    }
}

fn default_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

fn is_default_iterations(n: &u32) -> bool {
    *n == DEFAULT_KDF_ITERATIONS
}

/// Persisted, password-sealed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSeedRecord {
    pub encrypted_seed: String,
    pub iv: String,
    pub salt: String,
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    #[serde(
        default = "default_iterations",
        skip_serializing_if = "is_default_iterations"
    )]
    pub kdf_iterations: u32,
}

impl EncryptedSeedRecord {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| KeychainError::MalformedRecord(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| KeychainError::MalformedRecord(e.to_string()))
    }

    pub fn kdf(&self) -> KdfParams {
        KdfParams::new(self.kdf_iterations)
    }
}

/// Seal arbitrary key material under `password`.
pub fn seal_with<R: RngCore + CryptoRng>(
    rng: &mut R,
    kind: RecordKind,
    plaintext: &[u8],
    password: &str,
    params: KdfParams,
) -> Result<EncryptedSeedRecord> {
    let mut salt = [0u8; SALT_BYTES];
    let mut iv = [0u8; IV_BYTES];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let key = params.derive_key(password.as_bytes(), &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: kind.as_str().as_bytes(),
            },
        )
        .map_err(|_| KeychainError::MalformedRecord("encryption failed".into()))?;

    log::debug!(
        "sealed {} record ({} iterations)",
        kind.as_str(),
        params.iterations
    );

    Ok(EncryptedSeedRecord {
        encrypted_seed: hex::encode(ciphertext),
        iv: hex::encode(iv),
        salt: hex::encode(salt),
        version: VAULT_VERSION,
        kind,
        kdf_iterations: params.iterations,
    })
}

/// Open a record of the expected kind. A wrong password and a tampered
/// record are indistinguishable and both yield `Authentication`.
pub fn open(
    record: &EncryptedSeedRecord,
    expected: RecordKind,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    if record.version != VAULT_VERSION {
        return Err(KeychainError::UnsupportedVersion(record.version));
    }
    if record.kind != expected {
        return Err(KeychainError::MalformedRecord(format!(
            "expected {} record, found {}",
            expected.as_str(),
            record.kind.as_str()
        )));
    }
    let salt = decode_field("salt", &record.salt, Some(SALT_BYTES))?;
    let iv = decode_field("iv", &record.iv, Some(IV_BYTES))?;
    let ciphertext = decode_field("encryptedSeed", &record.encrypted_seed, None)?;

    let key = record.kdf().derive_key(password.as_bytes(), &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &ciphertext,
                aad: record.kind.as_str().as_bytes(),
            },
        )
        .map_err(|_| KeychainError::Authentication)?;
    Ok(Zeroizing::new(plaintext))
}

pub fn seal_seed(seed: &Seed, password: &str, params: KdfParams) -> Result<EncryptedSeedRecord> {
    seal_with(
        &mut rand::rngs::OsRng,
        RecordKind::HdSeed,
        seed.as_bytes(),
        password,
        params,
    )
}

pub fn open_seed(record: &EncryptedSeedRecord, password: &str) -> Result<Seed> {
    let plaintext = open(record, RecordKind::HdSeed, password)?;
    Seed::from_bytes(&plaintext)
}

pub fn seal_legacy_key(
    key: &SecretKey,
    password: &str,
    params: KdfParams,
) -> Result<EncryptedSeedRecord> {
    let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(key.to_bytes().into());
    seal_with(
        &mut rand::rngs::OsRng,
        RecordKind::LegacyKey,
        &bytes[..],
        password,
        params,
    )
}

pub fn open_legacy_key(record: &EncryptedSeedRecord, password: &str) -> Result<SecretKey> {
    let plaintext = open(record, RecordKind::LegacyKey, password)?;
    SecretKey::from_slice(&plaintext)
        .map_err(|_| KeychainError::MalformedRecord("legacy key out of range".into()))
}

fn decode_field(name: &str, value: &str, len: Option<usize>) -> Result<Vec<u8>> {
    let bytes = hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|_| KeychainError::MalformedRecord(format!("{name} is not hex")))?;
    match len {
        Some(n) if bytes.len() != n => Err(KeychainError::MalformedRecord(format!(
            "{name} must be {n} bytes, got {}",
            bytes.len()
        ))),
        _ => Ok(bytes),
    }
}
