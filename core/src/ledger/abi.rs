//! Ledger call encoding on top of `ethers::abi`.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{H160, U256};
use obscura_address::Address;
use obscura_field::FieldElement;

use crate::error::LedgerError;
use crate::ledger::{KeeperInfo, LedgerResult};

pub const DEPOSIT: &str = "deposit(uint256)";
pub const WITHDRAW: &str = "withdraw(uint256,bytes32,bytes)";
pub const COMMIT_TRADING_ACCOUNT: &str = "commitTradingAccount(bytes32)";
pub const REVEAL_TRADING_ACCOUNT: &str = "revealTradingAccount(bytes32,uint256,bytes)";
pub const SUBMIT_ORDER_PRIVATE: &str = "submitOrderPrivate(bytes,bytes32,bytes32,bytes32,bytes)";
pub const USED_NULLIFIERS: &str = "usedNullifiers(bytes32)";
pub const IS_ORDER_VALID: &str = "isOrderValid(bytes32)";
pub const KEEPERS: &str = "keepers(address)";
pub const ACTIVE_KEEPER_LIST: &str = "activeKeeperList(uint256)";

pub fn selector(signature: &str) -> [u8; 4] {
    ethers::utils::id(signature)
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&abi::encode(tokens));
    out
}

pub fn word(bytes: &[u8; 32]) -> Token {
    Token::FixedBytes(bytes.to_vec())
}

pub fn uint(v: u128) -> Token {
    Token::Uint(U256::from(v))
}

pub fn field(v: &FieldElement) -> Token {
    Token::Uint(U256::from_big_endian(&v.to_be_bytes()))
}

pub fn address(a: &Address) -> Token {
    Token::Address(to_h160(a))
}

pub fn bytes(data: &[u8]) -> Token {
    Token::Bytes(data.to_vec())
}

pub fn to_h160(a: &Address) -> H160 {
    H160::from(*a.as_bytes())
}

pub fn from_h160(a: H160) -> Address {
    Address(a.0)
}

fn decode(types: &[ParamType], data: &[u8]) -> LedgerResult<Vec<Token>> {
    abi::decode(types, data).map_err(|e| LedgerError::Decode(e.to_string()))
}

fn as_u64(token: Token) -> LedgerResult<u64> {
    let v = token
        .into_uint()
        .ok_or_else(|| LedgerError::Decode("expected uint".into()))?;
    if v.bits() > 64 {
        return Err(LedgerError::Decode(format!("{v} overflows u64")));
    }
    Ok(v.low_u64())
}

fn as_bool(token: Token) -> LedgerResult<bool> {
    token
        .into_bool()
        .ok_or_else(|| LedgerError::Decode("expected bool".into()))
}

pub fn decode_bool(data: &[u8]) -> LedgerResult<bool> {
    let token = decode(&[ParamType::Bool], data)?.into_iter().next();
    token
        .and_then(Token::into_bool)
        .ok_or_else(|| LedgerError::Decode("expected bool".into()))
}

pub fn decode_address(data: &[u8]) -> LedgerResult<Address> {
    let token = decode(&[ParamType::Address], data)?.into_iter().next();
    token
        .and_then(Token::into_address)
        .map(from_h160)
        .ok_or_else(|| LedgerError::Decode("expected address".into()))
}

/// Return data of the `keepers(address)` getter.
pub fn decode_keeper_info(data: &[u8]) -> LedgerResult<KeeperInfo> {
    let tokens = decode(
        &[
            ParamType::Bytes,
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bool,
            ParamType::Bool,
        ],
        data,
    )?;
    let [key, reputation, ok, failed, active, slashed]: [Token; 6] = tokens
        .try_into()
        .map_err(|_| LedgerError::Decode("keeper record has wrong arity".into()))?;
    Ok(KeeperInfo {
        public_key: key
            .into_bytes()
            .ok_or_else(|| LedgerError::Decode("expected bytes".into()))?,
        reputation_score: as_u64(reputation)?,
        successful_batches: as_u64(ok)?,
        failed_batches: as_u64(failed)?,
        is_active: as_bool(active)?,
        is_slashed: as_bool(slashed)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn test_static_layout() {
        let addr = Address([0x11; 20]);
        let out = encode_call("transfer(address,uint256)", &[address(&addr), uint(1)]);
        assert_eq!(out.len(), 4 + 2 * 32);
        assert_eq!(&out[4..16], &[0u8; 12]);
        assert_eq!(&out[16..36], &[0x11; 20]);
        assert_eq!(out[67], 1);
    }

    #[test]
    fn test_withdraw_carries_nullifier() {
        let nullifier = [0x5a; 32];
        let out = encode_call(WITHDRAW, &[uint(7), word(&nullifier), bytes(b"proof")]);
        assert_eq!(&out[..4], &selector(WITHDRAW));
        // amount, nullifier, offset, then len and padded data
        assert_eq!(out[4 + 31], 7);
        assert_eq!(&out[36..68], &nullifier);
        assert_eq!(out[68 + 31], 0x60);
        assert_eq!(out[100 + 31], 5);
        assert_eq!(&out[132..137], b"proof");
        assert_eq!(out.len(), 4 + 5 * 32);
    }

    #[test]
    fn test_field_token_is_big_endian() {
        let out = abi::encode(&[field(&FieldElement::from_u64(0x0102))]);
        assert_eq!(&out[30..32], &[0x01, 0x02]);
        assert!(out[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_keeper_info_decode() {
        let key = vec![2u8; 33];
        let out = abi::encode(&[
            Token::Bytes(key.clone()),
            uint(90),
            uint(8),
            uint(2),
            Token::Bool(true),
            Token::Bool(false),
        ]);
        let info = decode_keeper_info(&out).unwrap();
        assert_eq!(info.public_key, key);
        assert_eq!(info.reputation_score, 90);
        assert_eq!(info.successful_batches, 8);
        assert!(info.is_active);
        assert!(!info.is_slashed);
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode_bool(&[0u8; 16]).is_err());
        assert!(decode_address(&[]).is_err());

        let wide = abi::encode(&[
            Token::Bytes(vec![2u8; 33]),
            Token::Uint(U256::MAX),
            uint(0),
            uint(0),
            Token::Bool(true),
            Token::Bool(false),
        ]);
        assert!(matches!(
            decode_keeper_info(&wide),
            Err(LedgerError::Decode(_))
        ));
    }
}
