//! Authenticated boxing: the single AEAD primitive used for both the
//! Cookie's encrypted body and the per-record Message payload.
//!
//! Wire nonces are 8 bytes (§6); they are expanded to the cipher's 24-byte
//! nonce by prefixing a 16-byte domain constant, so a Cookie-box key and a
//! Message-box key can never be fed a colliding nonce even if both counters
//! happen to reach the same value.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};

use crate::errors::CryptoError;
use crate::KEY_SIZE;

/// Domain-separated nonce expansion: `prefix` identifies the box's role
/// (e.g. `b"sb-broker-cookie"` or `b"sb-broker-msg--\0"`), `counter` is the
/// 8-byte wire nonce.
fn expand_nonce(prefix: &[u8; 16], counter: u64) -> XNonce {
    let mut bytes = [0u8; 24];
    bytes[..16].copy_from_slice(prefix);
    bytes[16..].copy_from_slice(&counter.to_be_bytes());
    XNonce::from(bytes)
}

/// Opaque ciphertext produced by [`seal`]: plaintext length + `BOX_OVERHEAD`.
pub type SealedBox = Vec<u8>;

/// Authenticated-encrypt `plaintext` under `key` using a nonce derived from
/// `prefix` and `counter`.
pub fn seal(key: &[u8; KEY_SIZE], prefix: &[u8; 16], counter: u64, plaintext: &[u8]) -> SealedBox {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = expand_nonce(prefix, counter);
    cipher
        .encrypt(&nonce, plaintext)
        .expect("XChaCha20Poly1305 encryption is infallible for valid key/nonce sizes")
}

/// Authenticated-decrypt `ciphertext` under `key` using the same nonce
/// derivation as [`seal`]. Returns [`CryptoError::OpenFailed`] on any
/// authentication mismatch (wrong key, wrong counter, or tampered bytes).
pub fn open(
    key: &[u8; KEY_SIZE],
    prefix: &[u8; 16],
    counter: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = expand_nonce(prefix, counter);
    cipher.decrypt(&nonce, ciphertext).map_err(|_| CryptoError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: [u8; 16] = *b"sb-broker-test-\0";

    #[test]
    fn round_trips() {
        let key = [7u8; KEY_SIZE];
        let msg = b"register plugA";
        let ct = seal(&key, &PREFIX, 1, msg);
        let pt = open(&key, &PREFIX, 1, &ct).expect("decrypt");
        assert_eq!(pt, msg);
    }

    #[test]
    fn wrong_counter_fails() {
        let key = [7u8; KEY_SIZE];
        let ct = seal(&key, &PREFIX, 1, b"hello");
        assert!(open(&key, &PREFIX, 2, &ct).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let ct = seal(&[1u8; KEY_SIZE], &PREFIX, 1, b"hello");
        assert!(open(&[2u8; KEY_SIZE], &PREFIX, 1, &ct).is_err());
    }
}
