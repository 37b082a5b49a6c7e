use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("division by zero in the scalar field")]
    DivisionByZero,

    #[error("value is not a canonical field element (must be below the modulus)")]
    InvalidFieldElement,

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("invalid decimal encoding: {0}")]
    InvalidDecimal(String),

    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}
