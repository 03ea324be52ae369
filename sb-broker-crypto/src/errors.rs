use std::fmt;

/// Failure modes for the primitives in this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext failed authenticated decryption (wrong key, tampered bytes, or wrong nonce).
    OpenFailed,
    /// A key or nonce slice had the wrong length.
    BadLength { expected: usize, got: usize },
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed => write!(f, "authenticated decryption failed"),
            Self::BadLength { expected, got } => {
                write!(f, "expected {expected} bytes, got {got}")
            }
        }
    }
}

impl std::error::Error for CryptoError {}
