//! Keeper Order Encryption
//!
//! Encrypts an order envelope to a keeper using secp256k1 ECDH +
//! XChaCha20-Poly1305. Output size is constant so the ciphertext never
//! reveals how complex the order is.
//!
//! ```text
//! Flow:
//! 1. esk = HMAC-SHA256(sender_sk, fresh_random[32] || keeper_pk)   (hedged)
//! 2. Shared secret = ECDH(esk, keeper_pk).x
//! 3. Encryption key = SHA-256(shared_secret)
//! 4. Frame = version[1] || len[2, BE] || payload || zero padding   (439 bytes)
//! 5. Ciphertext = XChaCha20-Poly1305(key, nonce, frame, aad = epk)
//! 6. Output = epk[33] || nonce[24] || ciphertext+tag[455]          (512 bytes)
//! ```

use std::fmt;
use std::str::FromStr;

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey, ecdh::diffie_hellman};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::PrivacyError;
use crate::order::OrderEnvelope;

pub const ENCRYPTED_ORDER_SIZE: usize = 512;
pub const EPHEMERAL_KEY_SIZE: usize = 33;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;
pub const CIPHERTEXT_SIZE: usize = ENCRYPTED_ORDER_SIZE - EPHEMERAL_KEY_SIZE - NONCE_SIZE;
pub const FRAME_SIZE: usize = CIPHERTEXT_SIZE - TAG_SIZE;
const FRAME_HEADER: usize = 3;
pub const MAX_PAYLOAD_SIZE: usize = FRAME_SIZE - FRAME_HEADER;
pub const FRAME_VERSION: u8 = 1;

/// A keeper-addressed encrypted order, exactly one ledger storage slot.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedOrder([u8; ENCRYPTED_ORDER_SIZE]);

impl EncryptedOrder {
    /// Length-checked wrap of raw bytes (e.g. read back from the ledger).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PrivacyError> {
        let arr: [u8; ENCRYPTED_ORDER_SIZE] = bytes.try_into().map_err(|_| {
            PrivacyError::MalformedCiphertext(format!(
                "expected {ENCRYPTED_ORDER_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ENCRYPTED_ORDER_SIZE] {
        &self.0
    }

    pub fn ephemeral_public_key(&self) -> &[u8] {
        &self.0[..EPHEMERAL_KEY_SIZE]
    }

    pub fn nonce(&self) -> &[u8] {
        &self.0[EPHEMERAL_KEY_SIZE..EPHEMERAL_KEY_SIZE + NONCE_SIZE]
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.0[EPHEMERAL_KEY_SIZE + NONCE_SIZE..]
    }
}

impl fmt::Debug for EncryptedOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EncryptedOrder(epk=0x{}, {} bytes)",
            hex::encode(self.ephemeral_public_key()),
            ENCRYPTED_ORDER_SIZE
        )
    }
}

impl Serialize for EncryptedOrder {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for EncryptedOrder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s))
            .map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Keeper keys
// ============================================================================

/// A keeper's long-term decryption key.
#[derive(Clone)]
pub struct KeeperSecret(SecretKey);

impl KeeperSecret {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(SecretKey::random(rng))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PrivacyError> {
        SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| PrivacyError::InvalidSecretKey)
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes().into())
    }

    pub fn public_key(&self) -> KeeperPublicKey {
        KeeperPublicKey(self.0.public_key())
    }
}

impl From<SecretKey> for KeeperSecret {
    fn from(key: SecretKey) -> Self {
        Self(key)
    }
}

impl fmt::Debug for KeeperSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeeperSecret({})", self.public_key())
    }
}

/// A keeper's published encryption key (SEC1, compressed on the wire).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeeperPublicKey(PublicKey);

impl KeeperPublicKey {
    /// Accepts compressed or uncompressed SEC1 encodings.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, PrivacyError> {
        PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| PrivacyError::InvalidPublicKey(format!("0x{}", hex::encode(bytes))))
    }

    pub fn to_compressed(&self) -> [u8; EPHEMERAL_KEY_SIZE] {
        let point = self.0.to_encoded_point(true);
        let mut out = [0u8; EPHEMERAL_KEY_SIZE];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_compressed()))
    }
}

impl From<PublicKey> for KeeperPublicKey {
    fn from(key: PublicKey) -> Self {
        Self(key)
    }
}

impl FromStr for KeeperPublicKey {
    type Err = PrivacyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| PrivacyError::InvalidPublicKey(e.to_string()))?;
        Self::from_sec1_bytes(&bytes)
    }
}

impl fmt::Display for KeeperPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for KeeperPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeeperPublicKey({})", self.to_hex())
    }
}

impl Serialize for KeeperPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeeperPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Encrypt / decrypt
// ============================================================================

/// Encrypt an order envelope for a keeper.
pub fn encrypt_for_keeper(
    envelope: &OrderEnvelope,
    keeper: &KeeperPublicKey,
    sender: &SecretKey,
) -> Result<EncryptedOrder, PrivacyError> {
    envelope.order.validate()?;
    seal_for_keeper(
        &mut rand::rngs::OsRng,
        &envelope.to_bytes(),
        keeper,
        sender,
    )
}

/// Decrypt and decode an order envelope with the keeper's static key.
pub fn decrypt_for_keeper(
    encrypted: &EncryptedOrder,
    keeper: &KeeperSecret,
) -> Result<OrderEnvelope, PrivacyError> {
    let payload = open_for_keeper(encrypted, keeper)?;
    OrderEnvelope::from_bytes(&payload)
}

/// Encrypt an arbitrary payload of at most [`MAX_PAYLOAD_SIZE`] bytes.
pub fn seal_for_keeper<R: RngCore + CryptoRng>(
    rng: &mut R,
    payload: &[u8],
    keeper: &KeeperPublicKey,
    sender: &SecretKey,
) -> Result<EncryptedOrder, PrivacyError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(PrivacyError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let ephemeral = hedged_ephemeral(rng, sender, keeper)?;
    let epk = KeeperPublicKey(ephemeral.public_key()).to_compressed();
    let key = derive_order_key(&ephemeral, &keeper.0);

    let mut frame = Zeroizing::new([0u8; FRAME_SIZE]);
    frame[0] = FRAME_VERSION;
    frame[1..FRAME_HEADER].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    frame[FRAME_HEADER..FRAME_HEADER + payload.len()].copy_from_slice(payload);

    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|_| PrivacyError::Encryption)?;
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &frame[..],
                aad: &epk,
            },
        )
        .map_err(|_| PrivacyError::Encryption)?;
    debug_assert_eq!(ciphertext.len(), CIPHERTEXT_SIZE);

    let mut out = [0u8; ENCRYPTED_ORDER_SIZE];
    out[..EPHEMERAL_KEY_SIZE].copy_from_slice(&epk);
    out[EPHEMERAL_KEY_SIZE..EPHEMERAL_KEY_SIZE + NONCE_SIZE].copy_from_slice(&nonce);
    out[EPHEMERAL_KEY_SIZE + NONCE_SIZE..].copy_from_slice(&ciphertext);
    Ok(EncryptedOrder(out))
}

/// Decrypt to the raw payload. Never returns partial plaintext.
pub fn open_for_keeper(
    encrypted: &EncryptedOrder,
    keeper: &KeeperSecret,
) -> Result<Vec<u8>, PrivacyError> {
    let epk = PublicKey::from_sec1_bytes(encrypted.ephemeral_public_key()).map_err(|_| {
        PrivacyError::MalformedCiphertext("ephemeral key is not a curve point".into())
    })?;
    let key = derive_order_key(&keeper.0, &epk);

    let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|_| PrivacyError::Decryption)?;
    let frame = Zeroizing::new(
        cipher
            .decrypt(
                XNonce::from_slice(encrypted.nonce()),
                Payload {
                    msg: encrypted.ciphertext(),
                    aad: encrypted.ephemeral_public_key(),
                },
            )
            .map_err(|_| PrivacyError::Decryption)?,
    );

    if frame.len() != FRAME_SIZE || frame[0] != FRAME_VERSION {
        return Err(PrivacyError::MalformedCiphertext(format!(
            "unsupported frame version {}",
            frame.first().copied().unwrap_or_default()
        )));
    }
    let len = u16::from_be_bytes([frame[1], frame[2]]) as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(PrivacyError::MalformedCiphertext(format!(
            "declared length {len} exceeds frame"
        )));
    }
    let end = FRAME_HEADER + len;
    if frame[end..].iter().any(|b| *b != 0) {
        return Err(PrivacyError::MalformedCiphertext("non-zero padding".into()));
    }
    Ok(frame[FRAME_HEADER..end].to_vec())
}

/// Ephemeral scalar mixing fresh randomness with the sender's key, so a
/// weak RNG alone cannot reproduce it.
fn hedged_ephemeral<R: RngCore + CryptoRng>(
    rng: &mut R,
    sender: &SecretKey,
    keeper: &KeeperPublicKey,
) -> Result<SecretKey, PrivacyError> {
    let sender_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(sender.to_bytes().into());
    loop {
        let mut entropy = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut entropy[..]);

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&sender_bytes[..])
            .map_err(|_| PrivacyError::InvalidSecretKey)?;
        mac.update(&entropy[..]);
        mac.update(&keeper.to_compressed());
        let candidate: Zeroizing<[u8; 32]> = Zeroizing::new(mac.finalize().into_bytes().into());

        // rejected with probability ~2^-128
        if let Ok(sk) = SecretKey::from_slice(&candidate[..]) {
            return Ok(sk);
        }
    }
}

/// SHA-256 of the ECDH x-coordinate.
fn derive_order_key(secret: &SecretKey, public: &PublicKey) -> Zeroizing<[u8; 32]> {
    let shared = diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    Zeroizing::new(Sha256::digest(shared.raw_secret_bytes()).into())
}
