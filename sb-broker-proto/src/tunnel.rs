//! The server-role Crypto Tunnel state machine (C1, §4.1).
//!
//! A three-phase handshake (`INITIAL` → `COOKIE_SENT` → `ESTABLISHED`)
//! followed by an open-ended stream of authenticated Message records.

use sb_broker_crypto::{self as crypto, EphemeralKeyPair, LongTermKeyPair, MinuteKeyRing, PublicKeyBytes};

use crate::errors::TunnelError;
use crate::wire::{
    self, COOKIE_BOX_LEN, COOKIE_LEN, COOKIE_RESERVED, HELLO_BOX_LEN, HELLO_LEN,
    HELLO_PROOF_PREFIX, HELLO_ZERO_PAD, INITIATE_LEN, INITIATE_MESSAGE_BOX_LEN,
    INITIATE_MESSAGE_PLAINTEXT_LEN, INITIATE_MESSAGE_PREFIX, RecordHeader, TYPE_COOKIE,
    TYPE_HELLO, TYPE_INITIATE, VOUCH_BOX_LEN, VOUCH_PREFIX,
};
#[cfg(test)]
use crate::wire::COOKIE_ECHO_LEN;

/// The tunnel's current phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelPhase {
    Initial,
    CookieSent,
    Established,
}

/// Per-connection CurveCP-style tunnel state, server role.
pub struct ServerTunnel {
    phase: TunnelPhase,
    server_ephemeral_secret: PublicKeyBytes,
    server_ephemeral_pub: PublicKeyBytes,
    client_ephemeral_pub: PublicKeyBytes,
    session_key: PublicKeyBytes,
    send_nonce: u64,
    recv_hwm: u64,
    plugin_key: String,
}

fn random_even_nonce() -> u64 {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).expect("getrandom failed");
    // 2^48 range per §3, forced even so parity can distinguish client/server roles.
    (u64::from_be_bytes(buf) % (1u64 << 48)) & !1
}

impl ServerTunnel {
    pub fn new() -> Self {
        Self {
            phase: TunnelPhase::Initial,
            server_ephemeral_secret: [0; 32],
            server_ephemeral_pub: [0; 32],
            client_ephemeral_pub: [0; 32],
            session_key: [0; 32],
            send_nonce: random_even_nonce(),
            recv_hwm: 0,
            plugin_key: String::new(),
        }
    }

    pub fn phase(&self) -> TunnelPhase {
        self.phase
    }

    pub fn plugin_key(&self) -> &str {
        &self.plugin_key
    }

    /// Handle an INITIAL-phase Hello packet, returning the Cookie to send back.
    pub fn handle_hello(
        &mut self,
        packet: &[u8],
        server_longterm: &LongTermKeyPair,
        minute_keys: &MinuteKeyRing,
    ) -> Result<Vec<u8>, TunnelError> {
        if self.phase != TunnelPhase::Initial {
            return Err(TunnelError::UnexpectedPacket);
        }
        if packet.len() != HELLO_LEN {
            return Err(TunnelError::BadSize { expected: HELLO_LEN, got: packet.len() });
        }
        if wire::read_header(packet) != Some(TYPE_HELLO) {
            return Err(TunnelError::BadHeader);
        }

        let mut off = 8;
        let client_ephemeral_pub: PublicKeyBytes = packet[off..off + 32].try_into().unwrap();
        off += 32 + HELLO_ZERO_PAD.len();
        let nonce = u64::from_be_bytes(packet[off..off + 8].try_into().unwrap());
        off += 8;
        let proof_box = &packet[off..off + HELLO_BOX_LEN];

        let shared = server_longterm.diffie_hellman(&client_ephemeral_pub);
        let opened = crypto::open(&shared, &HELLO_PROOF_PREFIX, nonce, proof_box)
            .map_err(|_| TunnelError::Crypto)?;
        if opened.iter().any(|&b| b != 0) {
            return Err(TunnelError::Crypto);
        }

        let server_ephemeral = EphemeralKeyPair::generate();
        self.client_ephemeral_pub = client_ephemeral_pub;
        self.server_ephemeral_pub = server_ephemeral.public();
        self.server_ephemeral_secret = server_ephemeral.secret_bytes();
        self.phase = TunnelPhase::CookieSent;

        Ok(self.build_cookie(minute_keys))
    }

    fn build_cookie(&mut self, minute_keys: &MinuteKeyRing) -> Vec<u8> {
        self.send_nonce += 2;
        let mut plaintext = Vec::with_capacity(64);
        plaintext.extend_from_slice(&self.server_ephemeral_secret);
        plaintext.extend_from_slice(&self.client_ephemeral_pub);
        let cookie_box = minute_keys.seal_cookie(self.send_nonce, &plaintext);
        debug_assert_eq!(cookie_box.len(), COOKIE_BOX_LEN);

        let mut out = Vec::with_capacity(COOKIE_LEN);
        wire::write_header(&mut out, TYPE_COOKIE);
        out.extend_from_slice(&self.server_ephemeral_pub);
        out.extend_from_slice(&self.send_nonce.to_be_bytes());
        out.extend_from_slice(&cookie_box);
        out.extend_from_slice(&COOKIE_RESERVED);
        debug_assert_eq!(out.len(), COOKIE_LEN);
        out
    }

    /// Handle a COOKIE_SENT-phase Initiate packet. Returns `(plugin_key, initial
    /// plaintext message)` on success. On any failure the phase resets to
    /// `INITIAL` so the client may retry (§4.1).
    pub fn handle_initiate(
        &mut self,
        packet: &[u8],
        minute_keys: &MinuteKeyRing,
    ) -> Result<(String, Vec<u8>), TunnelError> {
        if self.phase != TunnelPhase::CookieSent {
            return Err(TunnelError::UnexpectedPacket);
        }
        if packet.len() != INITIATE_LEN {
            return Err(TunnelError::BadSize { expected: INITIATE_LEN, got: packet.len() });
        }
        if wire::read_header(packet) != Some(TYPE_INITIATE) {
            return Err(TunnelError::BadHeader);
        }

        let result = self.try_handle_initiate(packet, minute_keys);
        if result.is_err() {
            self.phase = TunnelPhase::Initial;
        }
        result
    }

    fn try_handle_initiate(
        &mut self,
        packet: &[u8],
        minute_keys: &MinuteKeyRing,
    ) -> Result<(String, Vec<u8>), TunnelError> {
        let mut off = 8;
        let nonce = u64::from_be_bytes(packet[off..off + 8].try_into().unwrap());
        off += 8;
        // The cookie's own seal-nonce is echoed back verbatim ahead of the
        // box (see `COOKIE_ECHO_LEN`): the server has no per-connection
        // state between Cookie and Initiate, so it cannot otherwise recover
        // the counter value `build_cookie` sealed under. `nonce` above is a
        // fresh value for this Initiate's own vouch/message boxes only.
        let cookie_nonce = u64::from_be_bytes(packet[off..off + 8].try_into().unwrap());
        off += 8;
        let cookie_echo = &packet[off..off + COOKIE_BOX_LEN];
        off += COOKIE_BOX_LEN;
        let vouch_ct = &packet[off..off + VOUCH_BOX_LEN];
        off += VOUCH_BOX_LEN;
        let message_ct = &packet[off..off + INITIATE_MESSAGE_BOX_LEN];

        let cookie_plaintext = minute_keys
            .open_cookie(cookie_nonce, cookie_echo)
            .map_err(|_| TunnelError::Crypto)?;
        let (server_secret_bytes, client_pub_in_cookie) = cookie_plaintext.split_at(32);
        if client_pub_in_cookie != self.client_ephemeral_pub.as_slice() {
            return Err(TunnelError::Crypto);
        }
        let server_ephemeral =
            LongTermKeyPair::from_secret_bytes(server_secret_bytes.try_into().unwrap());

        let session_key = server_ephemeral.diffie_hellman(&self.client_ephemeral_pub);

        let vouch_plaintext = crypto::open(&session_key, &VOUCH_PREFIX, nonce, vouch_ct)
            .map_err(|_| TunnelError::Crypto)?;
        let client_longterm_pub: PublicKeyBytes =
            vouch_plaintext.as_slice().try_into().map_err(|_| TunnelError::Crypto)?;

        let message_plaintext =
            crypto::open(&session_key, &INITIATE_MESSAGE_PREFIX, nonce, message_ct)
                .map_err(|_| TunnelError::Crypto)?;

        self.session_key = session_key;
        self.plugin_key = crypto::plugin_key_hex(&client_longterm_pub);
        self.phase = TunnelPhase::Established;

        Ok((self.plugin_key.clone(), message_plaintext))
    }

    /// Encrypt and frame a Message record (`crypto_write`, §4.1).
    pub fn encrypt_record(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TunnelError> {
        if self.phase != TunnelPhase::Established {
            return Err(TunnelError::UnexpectedPacket);
        }
        self.send_nonce += 2;
        let mut buf = plaintext.to_vec();
        let tag = crypto::record_seal(&self.session_key, self.send_nonce, &mut buf);
        let header = RecordHeader::write(self.send_nonce, &tag, buf.len() as u16);

        let mut out = Vec::with_capacity(header.len() + buf.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&buf);
        Ok(out)
    }

    /// Decrypt a Message record whose header has already been parsed by the framer.
    pub fn decrypt_record(
        &mut self,
        header: &RecordHeader,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, TunnelError> {
        if header.nonce <= self.recv_hwm {
            return Err(TunnelError::NonceReplay);
        }
        let mut buf = ciphertext.to_vec();
        crypto::record_open(&self.session_key, header.nonce, &header.tag, &mut buf)
            .map_err(|_| TunnelError::Crypto)?;
        self.recv_hwm = header.nonce;
        Ok(buf)
    }
}

impl Default for ServerTunnel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_broker_crypto::LongTermKeyPair as ClientKeyPair;

    fn client_sends_hello(server_longterm_pub: &PublicKeyBytes) -> (ClientKeyPair, Vec<u8>) {
        let client_eph = ClientKeyPair::generate();
        let shared = client_eph.diffie_hellman(server_longterm_pub);
        let nonce = 42u64;
        let zeros = [0u8; 64];
        let proof_box = crypto::seal(&shared, &HELLO_PROOF_PREFIX, nonce, &zeros);

        let mut pkt = Vec::with_capacity(HELLO_LEN);
        wire::write_header(&mut pkt, TYPE_HELLO);
        pkt.extend_from_slice(&client_eph.public());
        pkt.extend_from_slice(&HELLO_ZERO_PAD);
        pkt.extend_from_slice(&nonce.to_be_bytes());
        pkt.extend_from_slice(&proof_box);
        assert_eq!(pkt.len(), HELLO_LEN);
        (client_eph, pkt)
    }

    fn client_sends_initiate(
        client_longterm: &ClientKeyPair,
        client_eph: &ClientKeyPair,
        cookie_pkt: &[u8],
        extra_nonce: u64,
    ) -> Vec<u8> {
        let server_eph_pub: PublicKeyBytes = cookie_pkt[8..40].try_into().unwrap();
        let cookie_nonce = u64::from_be_bytes(cookie_pkt[40..48].try_into().unwrap());
        let cookie_echo = &cookie_pkt[48..48 + COOKIE_BOX_LEN];

        let session_key = client_eph.diffie_hellman(&server_eph_pub);
        let vouch = crypto::seal(&session_key, &VOUCH_PREFIX, extra_nonce, &client_longterm.public());
        let mut msg_plain = vec![0u8; INITIATE_MESSAGE_PLAINTEXT_LEN];
        msg_plain[..4].copy_from_slice(b"ping");
        let msg_box = crypto::seal(&session_key, &INITIATE_MESSAGE_PREFIX, extra_nonce, &msg_plain);

        let mut pkt = Vec::with_capacity(INITIATE_LEN);
        wire::write_header(&mut pkt, TYPE_INITIATE);
        pkt.extend_from_slice(&extra_nonce.to_be_bytes());
        pkt.extend_from_slice(&cookie_nonce.to_be_bytes());
        pkt.extend_from_slice(cookie_echo);
        pkt.extend_from_slice(&vouch);
        pkt.extend_from_slice(&msg_box);
        debug_assert_eq!(8 + cookie_echo.len(), COOKIE_ECHO_LEN);
        assert_eq!(pkt.len(), INITIATE_LEN);
        pkt
    }

    #[test]
    fn full_handshake_reaches_established() {
        let server_longterm = LongTermKeyPair::generate();
        let minute_keys = MinuteKeyRing::new();
        let mut tunnel = ServerTunnel::new();

        let (client_eph, hello) = client_sends_hello(&server_longterm.public());
        let cookie =
            tunnel.handle_hello(&hello, &server_longterm, &minute_keys).expect("hello accepted");
        assert_eq!(tunnel.phase(), TunnelPhase::CookieSent);

        let client_longterm = ClientKeyPair::generate();
        let initiate = client_sends_initiate(&client_longterm, &client_eph, &cookie, 7);
        let (plugin_key, first_message) =
            tunnel.handle_initiate(&initiate, &minute_keys).expect("initiate accepted");

        assert_eq!(tunnel.phase(), TunnelPhase::Established);
        assert_eq!(plugin_key, crypto::plugin_key_hex(&client_longterm.public()));
        assert_eq!(&first_message[..4], b"ping");
    }

    #[test]
    fn hello_of_wrong_size_leaves_state_unchanged() {
        let server_longterm = LongTermKeyPair::generate();
        let minute_keys = MinuteKeyRing::new();
        let mut tunnel = ServerTunnel::new();
        let (_, mut hello) = client_sends_hello(&server_longterm.public());
        hello.pop();
        assert!(tunnel.handle_hello(&hello, &server_longterm, &minute_keys).is_err());
        assert_eq!(tunnel.phase(), TunnelPhase::Initial);
    }

    #[test]
    fn stale_cookie_resets_to_initial() {
        let server_longterm = LongTermKeyPair::generate();
        let mut minute_keys = MinuteKeyRing::new();
        let mut tunnel = ServerTunnel::new();

        let (client_eph, hello) = client_sends_hello(&server_longterm.public());
        let cookie = tunnel
            .handle_hello(&hello, &server_longterm, &minute_keys)
            .expect("hello accepted");

        minute_keys.rotate();
        minute_keys.rotate();

        let client_longterm = ClientKeyPair::generate();
        let initiate = client_sends_initiate(&client_longterm, &client_eph, &cookie, 9);
        assert!(tunnel.handle_initiate(&initiate, &minute_keys).is_err());
        assert_eq!(tunnel.phase(), TunnelPhase::Initial);
    }

    #[test]
    fn record_round_trips_and_rejects_replay() {
        let server_longterm = LongTermKeyPair::generate();
        let minute_keys = MinuteKeyRing::new();
        let mut tunnel = ServerTunnel::new();
        let (client_eph, hello) = client_sends_hello(&server_longterm.public());
        let cookie = tunnel.handle_hello(&hello, &server_longterm, &minute_keys).unwrap();
        let client_longterm = ClientKeyPair::generate();
        let initiate = client_sends_initiate(&client_longterm, &client_eph, &cookie, 3);
        tunnel.handle_initiate(&initiate, &minute_keys).unwrap();

        let record = tunnel.encrypt_record(b"hello plugin").unwrap();
        let header = RecordHeader::parse(&record).unwrap();
        let ciphertext = &record[wire::RECORD_HEADER_LEN..];
        let plaintext = tunnel.decrypt_record(&header, ciphertext).unwrap();
        assert_eq!(plaintext, b"hello plugin");

        assert!(tunnel.decrypt_record(&header, ciphertext).is_err());
    }
}
