//! Loads the server's long-term identity keypair from `.keys/` at startup
//! (§6), the counterpart to what `sb-makekey add` writes.

use std::fs;
use std::io;
use std::path::Path;

use sb_broker_crypto::{LongTermKeyPair, PublicKeyBytes};

/// Reads `.keys/server-long-term` (the 32-byte secret key) and cross-checks
/// it against `.keys/server-long-term.pub`, the way the source's startup
/// path reads both files rather than trusting the secret key alone.
pub fn load_server_longterm(dir: &Path) -> io::Result<LongTermKeyPair> {
    let secret_bytes = read_fixed(&dir.join("server-long-term"))?;
    let expected_public = read_fixed(&dir.join("server-long-term.pub"))?;

    let keypair = LongTermKeyPair::from_secret_bytes(secret_bytes);
    if keypair.public() != expected_public {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "server-long-term.pub does not match server-long-term",
        ));
    }
    Ok(keypair)
}

fn read_fixed(path: &Path) -> io::Result<PublicKeyBytes> {
    let bytes = fs::read(path)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: expected 32 bytes, got {}", path.display(), bytes.len()),
        )
    })
}
