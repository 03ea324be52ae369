//! Minute-key rotation: the symmetric key that authenticates the server's
//! Cookie to itself when the client echoes it back in Initiate.

use crate::errors::CryptoError;
use crate::seal::{open, seal, SealedBox};
use crate::KEY_SIZE;

const COOKIE_PREFIX: [u8; 16] = *b"sb-broker-cookie";

fn fresh_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    getrandom::getrandom(&mut key).expect("getrandom failed");
    key
}

/// Holds the current and previous minute keys. `rotate` is expected to be
/// called once every 60 seconds by the owning engine's timer; this type has
/// no notion of wall-clock time itself.
pub struct MinuteKeyRing {
    current: [u8; KEY_SIZE],
    previous: [u8; KEY_SIZE],
}

impl MinuteKeyRing {
    /// Start with two independently-random keys, so a server that restarts
    /// never authenticates cookies from a previous process's key material.
    pub fn new() -> Self {
        Self { current: fresh_key(), previous: fresh_key() }
    }

    /// `previous <- current; current <- fresh random key`.
    pub fn rotate(&mut self) {
        self.previous = self.current;
        self.current = fresh_key();
    }

    /// Seal a cookie body under the current key.
    pub fn seal_cookie(&self, counter: u64, plaintext: &[u8]) -> SealedBox {
        seal(&self.current, &COOKIE_PREFIX, counter, plaintext)
    }

    /// Open a cookie body, trying the current key and then the previous one,
    /// giving a 60-120s validity window across a rotation boundary.
    pub fn open_cookie(&self, counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.current, &COOKIE_PREFIX, counter, ciphertext)
            .or_else(|_| open(&self.previous, &COOKIE_PREFIX, counter, ciphertext))
    }
}

impl Default for MinuteKeyRing {
    fn default() -> Self {
        Self::new()
    }
}
