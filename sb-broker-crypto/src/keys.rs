//! X25519 keypairs.
//!
//! The broker only ever plays the server role (§4.1), so every keypair it
//! holds — its long-term identity key loaded from `.keys/`, and the
//! per-connection key it mints when answering a Hello — must be byte-
//! recoverable: the per-connection key is sealed into the Cookie under the
//! minute key so the server need not keep per-connection crypto state
//! between Cookie and Initiate. `x25519_dalek::EphemeralSecret` is
//! deliberately not byte-convertible (it enforces single-use for a true
//! initiator role), so both roles here are built on `StaticSecret`.

use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::KEY_SIZE;

/// A bare 32-byte public key, independent of which role generated it.
pub type PublicKeyBytes = [u8; KEY_SIZE];

/// Number of hex characters in a plugin-key (two per public-key byte).
pub const PLUGINKEY_HEX_LEN: usize = KEY_SIZE * 2;

/// An X25519 keypair. Used both for the server's long-term identity key and
/// for the per-connection key minted in response to a Hello.
#[derive(Clone)]
pub struct X25519KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: PublicKeyBytes) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public(&self) -> PublicKeyBytes {
        *self.public.as_bytes()
    }

    pub fn secret_bytes(&self) -> PublicKeyBytes {
        self.secret.to_bytes()
    }

    /// Diffie-Hellman with a peer's public key, producing a 32-byte shared secret.
    pub fn diffie_hellman(&self, peer_public: &PublicKeyBytes) -> PublicKeyBytes {
        *self.secret.diffie_hellman(&PublicKey::from(*peer_public)).as_bytes()
    }
}

/// The server's permanent identity keypair, loaded once at startup from `.keys/`.
pub type LongTermKeyPair = X25519KeyPair;

/// A keypair minted for one connection's handshake (the server's response
/// ephemeral key in Cookie). Byte-recoverable so it can round-trip through
/// a minute-key-sealed Cookie.
pub type EphemeralKeyPair = X25519KeyPair;

/// Derive the printable plugin-key for a peer from its long-term public key:
/// uppercase hex of the raw 32 bytes, `PLUGINKEY_HEX_LEN` characters.
pub fn plugin_key_hex(public: &PublicKeyBytes) -> String {
    let mut out = String::with_capacity(PLUGINKEY_HEX_LEN);
    for byte in public {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
