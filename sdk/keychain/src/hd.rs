//! Hierarchical deterministic keys over secp256k1.
//!
//! ```text
//! master:        I = HMAC-SHA512(key = "ed25519 seed", data = seed)
//! hardened:      I = HMAC-SHA512(chain, 0x00 || k_par || ser32(i + 2^31))
//! non-hardened:  I = HMAC-SHA512(chain, serP(K_par) || ser32(i))
//! child:         k_i = (IL + k_par) mod n,  c_i = IR
//! ```
//!
//! `IL >= n` or `k_i == 0` makes the index unusable and is reported as a
//! derivation error.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use k256::elliptic_curve::PrimeField;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{FieldBytes, NonZeroScalar, PublicKey, Scalar, SecretKey};
use obscura_address::Address;
use obscura_field::FieldElement;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use crate::error::{KeychainError, Result};

type HmacSha512 = Hmac<Sha512>;

pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// HMAC key for the master node.
pub const MASTER_KEY_DOMAIN: &[u8] = b"ed25519 seed";

pub const BIP44_PURPOSE: u32 = 44;
pub const ETHEREUM_COIN_TYPE: u32 = 60;

/// One step of a derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildNumber(u32);

impl ChildNumber {
    pub fn normal(index: u32) -> Result<Self> {
        if index >= HARDENED_OFFSET {
            return Err(KeychainError::InvalidPath(format!("index {index} out of range")));
        }
        Ok(Self(index))
    }

    pub fn hardened(index: u32) -> Result<Self> {
        if index >= HARDENED_OFFSET {
            return Err(KeychainError::InvalidPath(format!("index {index} out of range")));
        }
        Ok(Self(index | HARDENED_OFFSET))
    }

    pub fn is_hardened(&self) -> bool {
        self.0 & HARDENED_OFFSET != 0
    }

    /// Index without the hardened bit.
    pub fn index(&self) -> u32 {
        self.0 & !HARDENED_OFFSET
    }

    /// Wire value, hardened bit included.
    pub fn to_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hardened() {
            write!(f, "{}'", self.index())
        } else {
            write!(f, "{}", self.index())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DerivationPath(Vec<ChildNumber>);

impl DerivationPath {
    /// `m/44'/60'/account'/0/address_index`
    pub fn bip44(account: u32, address_index: u32) -> Result<Self> {
        Ok(Self(vec![
            ChildNumber::hardened(BIP44_PURPOSE)?,
            ChildNumber::hardened(ETHEREUM_COIN_TYPE)?,
            ChildNumber::hardened(account)?,
            ChildNumber::normal(0)?,
            ChildNumber::normal(address_index)?,
        ]))
    }

    pub fn components(&self) -> &[ChildNumber] {
        &self.0
    }

    pub fn child(&self, child: ChildNumber) -> Self {
        let mut next = self.0.clone();
        next.push(child);
        Self(next)
    }
}

impl FromStr for DerivationPath {
    type Err = KeychainError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(KeychainError::InvalidPath(s.to_string()));
        }
        let mut out = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| KeychainError::InvalidPath(s.to_string()))?;
            out.push(if hardened {
                ChildNumber::hardened(index)?
            } else {
                ChildNumber::normal(index)?
            });
        }
        Ok(Self(out))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for c in &self.0 {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

/// A node in the key tree.
#[derive(Clone)]
pub struct HdNode {
    private_key: SecretKey,
    chain_code: Zeroizing<[u8; 32]>,
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_number: ChildNumber,
}

impl HdNode {
    /// Root node from a BIP39 seed (16..=64 bytes).
    pub fn master(seed: &[u8]) -> Result<Self> {
        if !(16..=64).contains(&seed.len()) {
            return Err(KeychainError::InvalidSeedLength(seed.len()));
        }
        let mut mac = HmacSha512::new_from_slice(MASTER_KEY_DOMAIN)
            .map_err(|e| KeychainError::Derivation(e.to_string()))?;
        mac.update(seed);
        let (private_key, chain_code) = split_output(mac);
        let private_key = SecretKey::from_bytes(&FieldBytes::from(*private_key))
            .map_err(|_| KeychainError::Derivation("master key out of range".into()))?;

        Ok(Self {
            private_key,
            chain_code,
            depth: 0,
            parent_fingerprint: [0u8; 4],
            child_number: ChildNumber(0),
        })
    }

    pub fn derive_child(&self, child: ChildNumber) -> Result<Self> {
        let depth = self
            .depth
            .checked_add(1)
            .ok_or_else(|| KeychainError::Derivation("maximum depth exceeded".into()))?;

        let mut mac = HmacSha512::new_from_slice(self.chain_code.as_slice())
            .map_err(|e| KeychainError::Derivation(e.to_string()))?;
        if child.is_hardened() {
            let key: Zeroizing<[u8; 32]> = Zeroizing::new(self.private_key.to_bytes().into());
            mac.update(&[0u8]);
            mac.update(key.as_slice());
        } else {
            mac.update(&self.compressed_public_key());
        }
        mac.update(&child.to_u32().to_be_bytes());
        let (il, chain_code) = split_output(mac);

        let tweak: Option<Scalar> = Scalar::from_repr(FieldBytes::from(*il)).into();
        let tweak = tweak.ok_or_else(|| {
            KeychainError::Derivation(format!("IL >= n at child {child}, try the next index"))
        })?;
        let parent: Scalar = *self.private_key.to_nonzero_scalar();
        let child_key: Option<NonZeroScalar> = NonZeroScalar::new(tweak + parent).into();
        let child_key = child_key.ok_or_else(|| {
            KeychainError::Derivation(format!("zero child key at {child}, try the next index"))
        })?;

        Ok(Self {
            private_key: SecretKey::from(child_key),
            chain_code,
            depth,
            parent_fingerprint: self.fingerprint(),
            child_number: child,
        })
    }

    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self> {
        let mut node = self.clone();
        for child in path.components() {
            node = node.derive_child(*child)?;
        }
        Ok(node)
    }

    pub fn private_key(&self) -> &SecretKey {
        &self.private_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    pub fn compressed_public_key(&self) -> [u8; 33] {
        let point = self.public_key().to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent_fingerprint(&self) -> [u8; 4] {
        self.parent_fingerprint
    }

    pub fn child_number(&self) -> ChildNumber {
        self.child_number
    }

    /// First four bytes of SHA-256 over the compressed public key.
    pub fn fingerprint(&self) -> [u8; 4] {
        let digest = Sha256::digest(self.compressed_public_key());
        [digest[0], digest[1], digest[2], digest[3]]
    }

    /// Ledger address for this node's key.
    pub fn address(&self) -> Address {
        address_of(&self.public_key())
    }

    /// The private scalar reduced into the commitment field.
    pub fn trading_secret(&self) -> FieldElement {
        let key: Zeroizing<[u8; 32]> = Zeroizing::new(self.private_key.to_bytes().into());
        FieldElement::from_be_bytes_mod_order(key.as_slice())
    }
}

impl fmt::Debug for HdNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdNode")
            .field("depth", &self.depth)
            .field("child_number", &self.child_number)
            .field("parent_fingerprint", &hex::encode(self.parent_fingerprint))
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

pub fn address_of(public_key: &PublicKey) -> Address {
    let point = public_key.to_encoded_point(false);
    // an uncompressed SEC1 point is always 65 bytes, so this cannot fail
    Address::from_uncompressed_public_key(point.as_bytes()).unwrap_or(Address::ZERO)
}

fn split_output(mac: HmacSha512) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
    let out = mac.finalize().into_bytes();
    let mut il = Zeroizing::new([0u8; 32]);
    il.copy_from_slice(&out[..32]);
    let mut ir = Zeroizing::new([0u8; 32]);
    ir.copy_from_slice(&out[32..]);
    (il, ir)
}

#[cfg(test)]
mod tests {
    use super::*;

    // seed of "abandon ... about" with an empty passphrase
    const SEED: &str = "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc19a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4";

    fn master() -> HdNode {
        HdNode::master(&hex::decode(SEED).unwrap()).unwrap()
    }

    #[test]
    fn test_master_vector() {
        let m = master();
        assert_eq!(
            hex::encode(m.private_key().to_bytes()),
            "560f9f3c94558b6551928bb781cf6092c6b8800b4fc544af2c9444ed126d51aa"
        );
        assert_eq!(
            hex::encode(m.chain_code()),
            "ddfa71109701bbf7c126c8c7ab5880b0dec3d167a8fe6afa7a9597df0bbee72b"
        );
        assert_eq!(m.depth(), 0);
        assert_eq!(m.parent_fingerprint(), [0u8; 4]);
    }

    #[test]
    fn test_bip44_vectors() {
        let m = master();
        let cases = [
            (
                0,
                "eb3558ea8d9f39289115e98d51a0694ddbe351793828e08d0ac14018f78546db",
                "0x6C2eC97C44eEcea72Cf1bb034194669728ACB04E",
            ),
            (
                1,
                "67238d90db8668fe15d410ee4a2ecd7e0fd2c2eae4a8413614e3aeaa5d4a6ed1",
                "0x8d1777d6E261738E0e15367B6c67481987fDfeeD",
            ),
            (
                2,
                "d5329a6156433954e7d24e5e465c2c044d4b87bf306db6b79ce75d30512f2105",
                "0xE4Aa69885717D5Ec1da7394e27604348e38a0d13",
            ),
        ];
        for (account, key, address) in cases {
            let node = m.derive_path(&DerivationPath::bip44(account, 0).unwrap()).unwrap();
            assert_eq!(hex::encode(node.private_key().to_bytes()), key, "account {account}");
            assert_eq!(node.address().to_checksum(), address, "account {account}");
            assert_eq!(node.depth(), 5);
        }
    }

    #[test]
    fn test_parent_fingerprint_links() {
        let m = master();
        let child = m.derive_child(ChildNumber::hardened(44).unwrap()).unwrap();
        assert_eq!(child.parent_fingerprint(), m.fingerprint());
        assert_eq!(child.child_number().to_u32(), 44 | HARDENED_OFFSET);
    }

    #[test]
    fn test_hardened_and_normal_differ() {
        let m = master();
        let h = m.derive_child(ChildNumber::hardened(0).unwrap()).unwrap();
        let n = m.derive_child(ChildNumber::normal(0).unwrap()).unwrap();
        assert_ne!(h.private_key().to_bytes(), n.private_key().to_bytes());
    }

    #[test]
    fn test_path_parse_display() {
        let path: DerivationPath = "m/44'/60'/3'/0/7".parse().unwrap();
        assert_eq!(path, DerivationPath::bip44(3, 7).unwrap());
        assert_eq!(path.to_string(), "m/44'/60'/3'/0/7");
        assert_eq!("m/44h/60h".parse::<DerivationPath>().unwrap().to_string(), "m/44'/60'");
        assert_eq!("m".parse::<DerivationPath>().unwrap().components().len(), 0);

        assert!("44'/60'".parse::<DerivationPath>().is_err());
        assert!("m/x".parse::<DerivationPath>().is_err());
        assert!("m/2147483648".parse::<DerivationPath>().is_err());
    }

    #[test]
    fn test_seed_length_bounds() {
        assert!(HdNode::master(&[0u8; 15]).is_err());
        assert!(HdNode::master(&[0u8; 65]).is_err());
        assert!(HdNode::master(&[0u8; 16]).is_ok());
    }

    #[test]
    fn test_trading_secret_in_field() {
        let node = master();
        let secret = node.trading_secret();
        assert!(secret.value() < obscura_field::modulus());
        assert_eq!(secret, master().trading_secret());
    }
}
