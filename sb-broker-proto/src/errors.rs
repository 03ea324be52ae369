use std::fmt;

/// Failures from the tunnel state machine (§4.1, §7's `crypto` taxonomy member).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TunnelError {
    /// A fixed-size handshake packet arrived with the wrong length.
    BadSize { expected: usize, got: usize },
    /// Magic or type byte didn't match what the current phase expects.
    BadHeader,
    /// Packet arrived in a phase that doesn't accept it (e.g. Initiate while INITIAL).
    UnexpectedPacket,
    /// A box failed to open, or an embedded value didn't match its expected pair.
    Crypto,
    /// A Message record's nonce did not strictly exceed the receive high-water mark.
    NonceReplay,
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSize { expected, got } => {
                write!(f, "expected a {expected}-byte packet, got {got}")
            }
            Self::BadHeader => write!(f, "bad packet magic or type byte"),
            Self::UnexpectedPacket => write!(f, "packet not valid for the current tunnel phase"),
            Self::Crypto => write!(f, "cryptographic verification failed"),
            Self::NonceReplay => write!(f, "record nonce did not exceed the high-water mark"),
        }
    }
}

impl std::error::Error for TunnelError {}
