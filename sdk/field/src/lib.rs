//! Obscura Field
//!
//! Modular arithmetic over the BN254 scalar field. Every commitment, nullifier
//! and trading secret in Obscura is a [`FieldElement`].
//!
//! ```text
//! p = 21888242871839275222246405745257275088548364400416034343698204186575808495617
//!   = 0x30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000001  (254 bits)
//! ```
//!
//! Elements are immutable and always reduced into `[0, p)`. Hex encoding is
//! 32-byte big-endian, zero padded, `0x`-prefixed lowercase.

mod error;

pub use error::FieldError;

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;
use std::sync::OnceLock;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Decimal form of the BN254 scalar field modulus.
pub const MODULUS_DECIMAL: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Big-endian bytes of the modulus.
pub const MODULUS_BYTES: [u8; FIELD_BYTES] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29,
    0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91,
    0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00, 0x00, 0x01,
];

/// Serialized width of a field element.
pub const FIELD_BYTES: usize = 32;

/// Bit length of the modulus.
pub const MODULUS_BITS: u64 = 254;

/// The field modulus `p`.
pub fn modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| BigUint::from_bytes_be(&MODULUS_BYTES))
}

/// An element of the BN254 scalar field.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldElement(BigUint);

impl FieldElement {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn one() -> Self {
        Self(BigUint::one())
    }

    /// Reduce an arbitrary integer into the field.
    pub fn new(value: BigUint) -> Self {
        let p = modulus();
        if &value < p {
            Self(value)
        } else {
            Self(value % p)
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self::new(BigUint::from(value))
    }

    pub fn from_u128(value: u128) -> Self {
        Self::new(BigUint::from(value))
    }

    /// Interpret big-endian bytes of any length, reducing mod p.
    pub fn from_be_bytes_mod_order(bytes: &[u8]) -> Self {
        Self::new(BigUint::from_bytes_be(bytes))
    }

    /// Strict decoding: exactly 32 big-endian bytes holding a value below p.
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, FieldError> {
        if bytes.len() != FIELD_BYTES {
            return Err(FieldError::InvalidLength {
                expected: FIELD_BYTES,
                got: bytes.len(),
            });
        }
        let value = BigUint::from_bytes_be(bytes);
        if &value >= modulus() {
            return Err(FieldError::InvalidFieldElement);
        }
        Ok(Self(value))
    }

    /// Parse hex (with or without `0x`), reducing mod p.
    pub fn from_hex(s: &str) -> Result<Self, FieldError> {
        let digits = strip_hex_prefix(s);
        if digits.is_empty() {
            return Err(FieldError::InvalidHex(s.to_string()));
        }
        let value = BigUint::parse_bytes(digits.as_bytes(), 16)
            .ok_or_else(|| FieldError::InvalidHex(s.to_string()))?;
        Ok(Self::new(value))
    }

    /// Parse the wire form: `0x` followed by exactly 64 hex digits, value below p.
    pub fn from_hex_canonical(s: &str) -> Result<Self, FieldError> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| FieldError::InvalidHex(s.to_string()))?;
        if digits.len() != FIELD_BYTES * 2 {
            return Err(FieldError::InvalidLength {
                expected: FIELD_BYTES,
                got: digits.len() / 2,
            });
        }
        let bytes = hex::decode(digits).map_err(|e| FieldError::InvalidHex(e.to_string()))?;
        Self::from_be_bytes(&bytes)
    }

    /// Parse a base-10 integer, reducing mod p.
    pub fn from_decimal(s: &str) -> Result<Self, FieldError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FieldError::InvalidDecimal(s.to_string()));
        }
        let value = BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| FieldError::InvalidDecimal(s.to_string()))?;
        Ok(Self::new(value))
    }

    /// Uniformly random element.
    ///
    /// Draws 254-bit candidates and rejects those `>= p`.
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let p = modulus();
        loop {
            let mut bytes = [0u8; FIELD_BYTES];
            rng.fill_bytes(&mut bytes);
            bytes[0] &= 0x3f;
            let candidate = BigUint::from_bytes_be(&bytes);
            if &candidate < p {
                return Self(candidate);
            }
        }
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn add(&self, other: &Self) -> Self {
        Self::new(&self.0 + &other.0)
    }

    pub fn sub(&self, other: &Self) -> Self {
        if self.0 >= other.0 {
            Self(&self.0 - &other.0)
        } else {
            Self(modulus() - &other.0 + &self.0)
        }
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self::new(&self.0 * &other.0)
    }

    pub fn neg(&self) -> Self {
        if self.is_zero() {
            Self::zero()
        } else {
            Self(modulus() - &self.0)
        }
    }

    pub fn square(&self) -> Self {
        self.mul(self)
    }

    /// `self^exponent` by left-to-right square-and-multiply.
    pub fn pow(&self, exponent: &BigUint) -> Self {
        let mut acc = Self::one();
        for i in (0..exponent.bits()).rev() {
            acc = acc.square();
            if exponent.bit(i) {
                acc = acc.mul(self);
            }
        }
        acc
    }

    pub fn pow_u64(&self, exponent: u64) -> Self {
        self.pow(&BigUint::from(exponent))
    }

    /// Multiplicative inverse via Fermat: `self^(p-2)`.
    pub fn inv(&self) -> Result<Self, FieldError> {
        if self.is_zero() {
            return Err(FieldError::DivisionByZero);
        }
        let exponent = modulus() - BigUint::from(2u8);
        Ok(self.pow(&exponent))
    }

    pub fn div(&self, other: &Self) -> Result<Self, FieldError> {
        Ok(self.mul(&other.inv()?))
    }

    /// 32-byte big-endian encoding.
    pub fn to_be_bytes(&self) -> [u8; FIELD_BYTES] {
        let raw = self.0.to_bytes_be();
        let mut out = [0u8; FIELD_BYTES];
        // raw is at most 32 bytes because the value is reduced
        out[FIELD_BYTES - raw.len()..].copy_from_slice(&raw);
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_be_bytes()))
    }

    pub fn to_decimal(&self) -> String {
        self.0.to_str_radix(10)
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

// ============================================================================
// Conversions
// ============================================================================

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<u128> for FieldElement {
    fn from(value: u128) -> Self {
        Self::from_u128(value)
    }
}

impl From<BigUint> for FieldElement {
    fn from(value: BigUint) -> Self {
        Self::new(value)
    }
}

impl From<[u8; FIELD_BYTES]> for FieldElement {
    fn from(bytes: [u8; FIELD_BYTES]) -> Self {
        Self::from_be_bytes_mod_order(&bytes)
    }
}

impl FromStr for FieldElement {
    type Err = FieldError;

    /// Accepts `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("0x") || s.starts_with("0X") {
            Self::from_hex(s)
        } else {
            Self::from_decimal(s)
        }
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.to_hex())
    }
}

impl Default for FieldElement {
    fn default() -> Self {
        Self::zero()
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex_canonical(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Operators
// ============================================================================

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident) => {
        impl $trait<&FieldElement> for &FieldElement {
            type Output = FieldElement;
            fn $method(self, rhs: &FieldElement) -> FieldElement {
                FieldElement::$method(self, rhs)
            }
        }

        impl $trait<FieldElement> for FieldElement {
            type Output = FieldElement;
            fn $method(self, rhs: FieldElement) -> FieldElement {
                FieldElement::$method(&self, &rhs)
            }
        }

        impl $trait<&FieldElement> for FieldElement {
            type Output = FieldElement;
            fn $method(self, rhs: &FieldElement) -> FieldElement {
                FieldElement::$method(&self, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add);
impl_binary_op!(Sub, sub);
impl_binary_op!(Mul, mul);

impl Neg for FieldElement {
    type Output = FieldElement;
    fn neg(self) -> FieldElement {
        FieldElement::neg(&self)
    }
}

impl Neg for &FieldElement {
    type Output = FieldElement;
    fn neg(self) -> FieldElement {
        FieldElement::neg(self)
    }
}
