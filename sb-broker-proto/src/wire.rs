//! On-wire constants and fixed-size packet layouts (§6).
//!
//! Every packet begins with the 7-byte magic and a 1-byte type tag. The
//! three handshake packets (Hello, Cookie, Initiate) are fixed-size; the
//! Message packet is a 40-byte header followed by a variable-length
//! detached-tag ChaCha20Poly1305 ciphertext.

/// Magic prefix on every packet.
pub const MAGIC: [u8; 7] = *b"rZQTd2n";

pub const TYPE_HELLO: u8 = b'H';
pub const TYPE_COOKIE: u8 = b'C';
pub const TYPE_INITIATE: u8 = b'I';
pub const TYPE_MESSAGE: u8 = b'M';

pub const HELLO_LEN: usize = 192;
pub const COOKIE_LEN: usize = 200;
pub const INITIATE_LEN: usize = 256;

/// Length of a Message record's fixed header.
pub const RECORD_HEADER_LEN: usize = 40;

/// Length of the box used to carry the client ephemeral public key's
/// zero-plaintext proof in Hello.
pub const HELLO_BOX_LEN: usize = 80;
const HELLO_ZERO_PAD_LEN: usize = 64;

/// Length of the minute-key-sealed cookie body inside a Cookie packet.
pub const COOKIE_BOX_LEN: usize = 80;
const COOKIE_RESERVED_LEN: usize = 72;

/// Length of the cookie echoed back verbatim in Initiate: the 8-byte nonce
/// the server sealed it under, plus the cookie box itself. The server has no
/// per-connection state between Cookie and Initiate, so it cannot remember
/// which counter value it used to seal the cookie — the client must echo it
/// back alongside the box so `open_cookie` authenticates against the same
/// nonce `seal_cookie` used.
pub const COOKIE_ECHO_LEN: usize = 8 + COOKIE_BOX_LEN;
/// Length of the vouch box inside Initiate (seals the client's long-term key).
pub const VOUCH_BOX_LEN: usize = 48;
/// Length of the boxed initial-message slot inside Initiate.
pub const INITIATE_MESSAGE_BOX_LEN: usize = 104;
pub const INITIATE_MESSAGE_PLAINTEXT_LEN: usize = INITIATE_MESSAGE_BOX_LEN - sb_broker_crypto::BOX_OVERHEAD;

/// Domain-separation prefixes for each sealed box in the handshake (§4.1).
/// Part of the wire contract: any client-side implementation needs these
/// exact labels to produce a box the server's tunnel will open.
pub const HELLO_PROOF_PREFIX: [u8; 16] = *b"sb-broker-hello-";
pub const VOUCH_PREFIX: [u8; 16] = *b"sb-broker-vouch-";
pub const INITIATE_MESSAGE_PREFIX: [u8; 16] = *b"sb-broker-initm-";

/// Check a packet's leading magic + type byte, returning the type byte.
pub fn read_header(buf: &[u8]) -> Option<u8> {
    if buf.len() < 8 || buf[..7] != MAGIC {
        return None;
    }
    Some(buf[7])
}

/// Write the magic + type prefix into `buf[0..8]`.
pub fn write_header(buf: &mut Vec<u8>, ty: u8) {
    buf.extend_from_slice(&MAGIC);
    buf.push(ty);
}

/// A parsed Message record header (the first [`RECORD_HEADER_LEN`] bytes).
pub struct RecordHeader {
    pub nonce: u64,
    pub tag: [u8; 16],
    pub plaintext_len: u16,
}

impl RecordHeader {
    /// Parse a 40-byte header. Returns `None` if the magic/type don't match.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < RECORD_HEADER_LEN || read_header(buf)? != TYPE_MESSAGE {
            return None;
        }
        let nonce = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        let mut tag = [0u8; 16];
        tag.copy_from_slice(&buf[16..32]);
        let plaintext_len = u16::from_be_bytes(buf[32..34].try_into().unwrap());
        Some(Self { nonce, tag, plaintext_len })
    }

    /// Total encrypted-record length: header plus ciphertext (ciphertext is
    /// the same length as the plaintext since the tag is detached into the header).
    pub fn record_len(&self) -> usize {
        RECORD_HEADER_LEN + self.plaintext_len as usize
    }

    /// Serialize a header for an outbound record.
    pub fn write(nonce: u64, tag: &[u8; 16], plaintext_len: u16) -> [u8; RECORD_HEADER_LEN] {
        let mut out = [0u8; RECORD_HEADER_LEN];
        out[..7].copy_from_slice(&MAGIC);
        out[7] = TYPE_MESSAGE;
        out[8..16].copy_from_slice(&nonce.to_be_bytes());
        out[16..32].copy_from_slice(tag);
        out[32..34].copy_from_slice(&plaintext_len.to_be_bytes());
        // out[34..40] left zeroed: reserved.
        out
    }
}

pub const HELLO_ZERO_PAD: [u8; HELLO_ZERO_PAD_LEN] = [0u8; HELLO_ZERO_PAD_LEN];
pub const COOKIE_RESERVED: [u8; COOKIE_RESERVED_LEN] = [0u8; COOKIE_RESERVED_LEN];
