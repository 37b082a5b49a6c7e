use obscura_address::AddressError;
use obscura_field::FieldError;
use obscura_keychain::KeychainError;
use obscura_privacy::PrivacyError;
use thiserror::Error;

/// Failures talking to the ledger contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("nullifier already used: {0}")]
    NullifierUsed(String),

    #[error("malformed ledger response: {0}")]
    Decode(String),
}

/// Failures of the local secret store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record {0} failed authentication")]
    Corrupt(String),

    #[error("storage is locked")]
    Locked,
}

/// Client-facing error taxonomy.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("duplicate nullifier: {0}")]
    DuplicateNullifier(String),

    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("authentication failed: wrong password")]
    Authentication,

    #[error("nullifier already used: {0}")]
    Replay(String),

    #[error("reveal not ready: {remaining} more block(s) required")]
    Timing { remaining: u64 },

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("network failure: {0}")]
    Network(String),

    #[error("no eligible counterparty: {0}")]
    Counterparty(String),

    #[error("invalid state: {0}")]
    State(String),
}

impl ClientError {
    /// Only transport-level and availability failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::Counterparty(_))
    }
}

impl From<LedgerError> for ClientError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Transport(_) | LedgerError::Rpc { .. } => ClientError::Network(e.to_string()),
            LedgerError::NullifierUsed(n) => ClientError::Replay(n),
            LedgerError::Reverted(reason) => {
                ClientError::Validation(format!("ledger rejected transaction: {reason}"))
            }
            LedgerError::Decode(msg) => ClientError::Network(format!("bad response: {msg}")),
        }
    }
}

impl From<PrivacyError> for ClientError {
    fn from(e: PrivacyError) -> Self {
        match e {
            PrivacyError::DuplicateNullifier(n) => ClientError::DuplicateNullifier(n),
            PrivacyError::InvalidFieldElement(FieldError::DivisionByZero) => {
                ClientError::Crypto(e.to_string())
            }
            e if e.is_validation() => ClientError::Validation(e.to_string()),
            PrivacyError::InvalidFieldElement(_) => ClientError::Validation(e.to_string()),
            e => ClientError::Crypto(e.to_string()),
        }
    }
}

impl From<KeychainError> for ClientError {
    fn from(e: KeychainError) -> Self {
        match e {
            KeychainError::Authentication => ClientError::Authentication,
            KeychainError::InvalidMnemonic(_)
            | KeychainError::InvalidEntropyBits(_)
            | KeychainError::InvalidSeedLength(_)
            | KeychainError::InvalidPath(_) => ClientError::Validation(e.to_string()),
            KeychainError::Derivation(_) => ClientError::Crypto(e.to_string()),
            KeychainError::MalformedRecord(_) | KeychainError::UnsupportedVersion(_) => {
                ClientError::Storage(StorageError::Serialization(e.to_string()))
            }
            KeychainError::NotInitialized | KeychainError::AlreadyInitialized => {
                ClientError::State(e.to_string())
            }
        }
    }
}

impl From<FieldError> for ClientError {
    fn from(e: FieldError) -> Self {
        match e {
            FieldError::DivisionByZero => ClientError::Crypto(e.to_string()),
            _ => ClientError::Validation(e.to_string()),
        }
    }
}

impl From<AddressError> for ClientError {
    fn from(e: AddressError) -> Self {
        ClientError::Validation(e.to_string())
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
