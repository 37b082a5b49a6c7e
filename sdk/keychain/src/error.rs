use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeychainError {
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("invalid entropy length: {0} bits (must be 128-256 and a multiple of 32)")]
    InvalidEntropyBits(usize),

    #[error("invalid seed length: {0} bytes")]
    InvalidSeedLength(usize),

    #[error("invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("authentication failed: wrong password or corrupted vault record")]
    Authentication,

    #[error("malformed vault record: {0}")]
    MalformedRecord(String),

    #[error("unsupported vault record version {0}")]
    UnsupportedVersion(u32),

    #[error("wallet is not initialized")]
    NotInitialized,

    #[error("wallet is already initialized")]
    AlreadyInitialized,
}

impl From<bip39::Error> for KeychainError {
    fn from(e: bip39::Error) -> Self {
        match e {
            bip39::Error::BadEntropyBitCount(bits) => KeychainError::InvalidEntropyBits(bits),
            other => KeychainError::InvalidMnemonic(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, KeychainError>;
