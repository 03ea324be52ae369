//! Per-record Message encryption with a detached tag, so the tag can be
//! embedded in the fixed 40-byte wire header ahead of the variable-length
//! ciphertext (see `sb-broker-proto::wire`).

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};

use crate::errors::CryptoError;
use crate::KEY_SIZE;

/// Length in bytes of the detached authentication tag.
pub const RECORD_TAG_LEN: usize = 16;

const RECORD_NONCE_PREFIX: [u8; 4] = *b"sb-m";

fn expand_nonce(counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&RECORD_NONCE_PREFIX);
    bytes[4..].copy_from_slice(&counter.to_be_bytes());
    Nonce::from(bytes)
}

/// Encrypt `plaintext` in place under `key`/`counter`, returning the detached
/// 16-byte tag. `plaintext` becomes the ciphertext on return.
pub fn record_seal(key: &[u8; KEY_SIZE], counter: u64, plaintext: &mut Vec<u8>) -> [u8; RECORD_TAG_LEN] {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = expand_nonce(counter);
    let tag = cipher
        .encrypt_in_place_detached(&nonce, b"", plaintext)
        .expect("ChaCha20Poly1305 encryption is infallible for valid key/nonce sizes");
    tag.into()
}

/// Decrypt `ciphertext` in place under `key`/`counter`/`tag`. On success
/// `ciphertext` becomes the plaintext; on failure it is left unspecified and
/// must be discarded by the caller.
pub fn record_open(
    key: &[u8; KEY_SIZE],
    counter: u64,
    tag: &[u8; RECORD_TAG_LEN],
    ciphertext: &mut Vec<u8>,
) -> Result<(), CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = expand_nonce(counter);
    cipher
        .decrypt_in_place_detached(&nonce, b"", ciphertext, Tag::from_slice(tag))
        .map_err(|_| CryptoError::OpenFailed)
}
