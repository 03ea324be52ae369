//! Cryptographic primitives for the broker's CurveCP-style tunnel.
//!
//! Provides:
//! - X25519 key agreement for long-term and ephemeral keypairs
//! - ChaCha20-Poly1305 authenticated boxing (CurveCP's "box"/"secretbox" role)
//! - minute-key rotation and cookie authentication
//! - plugin-key derivation from a long-term public key
//!
//! Byte-level wire layout (packet headers, record framing) lives in
//! `sb-broker-proto`; this crate only exposes the primitive operations the
//! tunnel state machine calls.

#![deny(unsafe_code)]

mod errors;
mod keys;
mod minutekey;
mod record;
mod seal;

pub use errors::CryptoError;
pub use keys::{plugin_key_hex, EphemeralKeyPair, LongTermKeyPair, PublicKeyBytes, PLUGINKEY_HEX_LEN};
pub use minutekey::MinuteKeyRing;
pub use record::{record_open, record_seal, RECORD_TAG_LEN};
pub use seal::{open, seal, SealedBox};

/// Size in bytes of an X25519 public or secret key.
pub const KEY_SIZE: usize = 32;

/// Size in bytes of the Poly1305 authentication tag appended to a sealed box.
pub const BOX_OVERHEAD: usize = 16;
