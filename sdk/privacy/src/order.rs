//! Order payloads and their canonical encoding.
//!
//! ```text
//! OrderPayload (224 bytes, one 32-byte big-endian word per field):
//!   market | size | price | flags | leverage | take_profit | stop_loss
//!
//! OrderEnvelope (288 bytes, what the keeper decrypts):
//!   OrderPayload | nonce | order_commitment
//! ```

use obscura_field::{FIELD_BYTES, FieldElement};
use serde::{Deserialize, Serialize};

use crate::PrivacyError;
use crate::commitment::{Commitment, CommitmentEngine};

pub const ORDER_WORDS: usize = 7;
pub const ORDER_BYTES: usize = ORDER_WORDS * FIELD_BYTES;
pub const ENVELOPE_BYTES: usize = ORDER_BYTES + 2 * FIELD_BYTES;
pub const MAX_LEVERAGE: u32 = 100;

/// Order flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OrderFlags(pub u8);

impl OrderFlags {
    pub const LONG: u8 = 0x01;
    pub const REDUCE_ONLY: u8 = 0x02;
    pub const MARKET: u8 = 0x04;
    pub const ALL: u8 = Self::LONG | Self::REDUCE_ONLY | Self::MARKET;

    pub fn new(long: bool, reduce_only: bool, market: bool) -> Self {
        let mut bits = 0;
        if long {
            bits |= Self::LONG;
        }
        if reduce_only {
            bits |= Self::REDUCE_ONLY;
        }
        if market {
            bits |= Self::MARKET;
        }
        Self(bits)
    }

    pub fn is_long(&self) -> bool {
        self.0 & Self::LONG != 0
    }

    pub fn is_reduce_only(&self) -> bool {
        self.0 & Self::REDUCE_ONLY != 0
    }

    pub fn is_market(&self) -> bool {
        self.0 & Self::MARKET != 0
    }
}

/// A perpetual order before commitment.
///
/// Prices and sizes are fixed-point integers in the market's base units.
/// A zero `take_profit` or `stop_loss` means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderPayload {
    pub market: u32,
    pub size: u128,
    pub price: u128,
    pub flags: OrderFlags,
    pub leverage: u32,
    pub take_profit: u128,
    pub stop_loss: u128,
}

impl OrderPayload {
    pub fn validate(&self) -> Result<(), PrivacyError> {
        if self.flags.0 & !OrderFlags::ALL != 0 {
            return Err(PrivacyError::InvalidOrder(format!(
                "unknown flag bits {:#04x}",
                self.flags.0
            )));
        }
        if self.size == 0 {
            return Err(PrivacyError::InvalidOrder("size must be positive".into()));
        }
        if self.leverage == 0 || self.leverage > MAX_LEVERAGE {
            return Err(PrivacyError::InvalidOrder(format!(
                "leverage {} outside 1..={MAX_LEVERAGE}",
                self.leverage
            )));
        }
        if self.flags.is_market() {
            return Ok(());
        }
        if self.price == 0 {
            return Err(PrivacyError::InvalidOrder(
                "limit order requires a price".into(),
            ));
        }

        // exits must sit on the profitable/losing side of the entry
        let long = self.flags.is_long();
        if self.take_profit != 0 && (self.take_profit > self.price) != long {
            return Err(PrivacyError::InvalidOrder(
                "take profit on the wrong side of the entry price".into(),
            ));
        }
        if self.stop_loss != 0 && (self.stop_loss < self.price) != long {
            return Err(PrivacyError::InvalidOrder(
                "stop loss on the wrong side of the entry price".into(),
            ));
        }
        Ok(())
    }

    /// Field-element view of the canonical words, in encoding order.
    pub fn to_field_elements(&self) -> [FieldElement; ORDER_WORDS] {
        [
            FieldElement::from_u64(self.market as u64),
            FieldElement::from_u128(self.size),
            FieldElement::from_u128(self.price),
            FieldElement::from_u64(self.flags.0 as u64),
            FieldElement::from_u64(self.leverage as u64),
            FieldElement::from_u128(self.take_profit),
            FieldElement::from_u128(self.stop_loss),
        ]
    }

    pub fn to_bytes(&self) -> [u8; ORDER_BYTES] {
        let mut out = [0u8; ORDER_BYTES];
        for (i, word) in self.to_field_elements().iter().enumerate() {
            out[i * FIELD_BYTES..(i + 1) * FIELD_BYTES].copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PrivacyError> {
        if bytes.len() != ORDER_BYTES {
            return Err(PrivacyError::InvalidOrder(format!(
                "expected {ORDER_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let word = |i: usize| &bytes[i * FIELD_BYTES..(i + 1) * FIELD_BYTES];

        Ok(Self {
            market: read_word::<4>(word(0), "market").map(u32::from_be_bytes)?,
            size: read_word::<16>(word(1), "size").map(u128::from_be_bytes)?,
            price: read_word::<16>(word(2), "price").map(u128::from_be_bytes)?,
            flags: OrderFlags(read_word::<1>(word(3), "flags")?[0]),
            leverage: read_word::<4>(word(4), "leverage").map(u32::from_be_bytes)?,
            take_profit: read_word::<16>(word(5), "take_profit").map(u128::from_be_bytes)?,
            stop_loss: read_word::<16>(word(6), "stop_loss").map(u128::from_be_bytes)?,
        })
    }
}

/// Take the low `N` bytes of a 32-byte word, requiring the rest to be zero.
fn read_word<const N: usize>(word: &[u8], name: &str) -> Result<[u8; N], PrivacyError> {
    let (high, low) = word.split_at(FIELD_BYTES - N);
    if high.iter().any(|b| *b != 0) {
        return Err(PrivacyError::InvalidOrder(format!("{name} out of range")));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(low);
    Ok(out)
}

/// Order plus the opening of its commitment, as delivered to a keeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEnvelope {
    pub order: OrderPayload,
    pub nonce: FieldElement,
    pub commitment: Commitment,
}

impl OrderEnvelope {
    pub fn new(engine: &CommitmentEngine, order: OrderPayload, nonce: FieldElement) -> Self {
        let commitment = engine.order_commitment(&order, &nonce);
        Self {
            order,
            nonce,
            commitment,
        }
    }

    /// Check the embedded commitment opens to the embedded order.
    pub fn verify(&self, engine: &CommitmentEngine) -> bool {
        engine.order_commitment(&self.order, &self.nonce) == self.commitment
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENVELOPE_BYTES);
        out.extend_from_slice(&self.order.to_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(self.commitment.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PrivacyError> {
        if bytes.len() != ENVELOPE_BYTES {
            return Err(PrivacyError::InvalidOrder(format!(
                "envelope must be {ENVELOPE_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let order = OrderPayload::from_bytes(&bytes[..ORDER_BYTES])?;
        let nonce = FieldElement::from_be_bytes(&bytes[ORDER_BYTES..ORDER_BYTES + FIELD_BYTES])?;
        let commitment = Commitment::from_slice(&bytes[ORDER_BYTES + FIELD_BYTES..])?;
        Ok(Self {
            order,
            nonce,
            commitment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> OrderPayload {
        OrderPayload {
            market: 1,
            size: 2_500_000,
            price: 64_000_000_000,
            flags: OrderFlags::new(true, false, false),
            leverage: 10,
            take_profit: 70_000_000_000,
            stop_loss: 60_000_000_000,
        }
    }

    #[test]
    fn test_canonical_layout() {
        let bytes = sample_order().to_bytes();
        assert_eq!(bytes.len(), 224);
        // market word
        assert_eq!(&bytes[28..32], &1u32.to_be_bytes());
        assert!(bytes[..28].iter().all(|b| *b == 0));
        // flags word
        assert_eq!(bytes[3 * 32 + 31], OrderFlags::LONG);
        assert_eq!(OrderPayload::from_bytes(&bytes).unwrap(), sample_order());
    }

    #[test]
    fn test_decode_rejects_overflowing_word() {
        let mut bytes = sample_order().to_bytes();
        bytes[4 * 32] = 1; // leverage word high byte
        assert!(matches!(
            OrderPayload::from_bytes(&bytes),
            Err(PrivacyError::InvalidOrder(_))
        ));
        assert!(OrderPayload::from_bytes(&bytes[..100]).is_err());
    }

    #[test]
    fn test_validate_accepts_sample() {
        assert!(sample_order().validate().is_ok());
    }

    #[test]
    fn test_validate_rejections() {
        let mut o = sample_order();
        o.size = 0;
        assert!(o.validate().is_err());

        let mut o = sample_order();
        o.leverage = MAX_LEVERAGE + 1;
        assert!(o.validate().is_err());

        let mut o = sample_order();
        o.flags = OrderFlags(0x80);
        assert!(o.validate().is_err());

        let mut o = sample_order();
        o.price = 0;
        assert!(o.validate().is_err());

        // long with take profit below entry
        let mut o = sample_order();
        o.take_profit = 50_000_000_000;
        assert!(o.validate().is_err());

        // short with stop loss below entry
        let mut o = sample_order();
        o.flags = OrderFlags::new(false, false, false);
        o.take_profit = 0;
        o.stop_loss = 50_000_000_000;
        assert!(o.validate().is_err());
    }

    #[test]
    fn test_market_order_needs_no_price() {
        let mut o = sample_order();
        o.flags = OrderFlags::new(false, true, true);
        o.price = 0;
        assert!(o.validate().is_ok());
        assert!(o.flags.is_reduce_only());
    }

    #[test]
    fn test_envelope_roundtrip_and_verify() {
        let engine = CommitmentEngine::default();
        let envelope = OrderEnvelope::new(&engine, sample_order(), FieldElement::from_u64(99));
        let bytes = envelope.to_bytes();
        assert_eq!(bytes.len(), ENVELOPE_BYTES);

        let back = OrderEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(back, envelope);
        assert!(back.verify(&engine));

        let mut forged = back.clone();
        forged.order.size += 1;
        assert!(!forged.verify(&engine), "altered order must not open the commitment");
    }
}
