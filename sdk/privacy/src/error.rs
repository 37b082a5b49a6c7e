use obscura_address::AddressError;
use obscura_field::FieldError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrivacyError {
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("invalid field element: {0}")]
    InvalidFieldElement(#[from] FieldError),

    #[error("invalid nullifier: {0}")]
    InvalidNullifier(String),

    #[error("duplicate nullifier in batch: {0}")]
    DuplicateNullifier(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("plaintext too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed: authentication tag mismatch")]
    Decryption,
}

impl PrivacyError {
    /// Malformed caller input, detected before any cryptographic work.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PrivacyError::InvalidAddress(_)
                | PrivacyError::InvalidNullifier(_)
                | PrivacyError::InvalidOrder(_)
                | PrivacyError::PayloadTooLarge { .. }
                | PrivacyError::MalformedCiphertext(_)
                | PrivacyError::InvalidPublicKey(_)
        )
    }
}
