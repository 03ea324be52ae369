//! Wire protocol for sb-broker.
//!
//! - [`tunnel`] — the Crypto Tunnel state machine (C1): Hello/Cookie/Initiate
//!   handshake and Message record encrypt/decrypt.
//! - [`framer`] — the Packet Framer (C2): assembles fixed-size handshake
//!   packets and variable-length Message records from a byte stream.
//! - [`codec`] — the Message Codec (C3): the self-describing object tree and
//!   Request/Response/ErrorResponse classification.
//! - [`wire`] — shared on-wire constants and layouts (§6).

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod framer;
pub mod tunnel;
pub mod wire;

pub use codec::{classify, Message, RequestMessage, ResponseMessage, ErrorResponseMessage, Value};
pub use errors::TunnelError;
pub use framer::Framer;
pub use tunnel::{ServerTunnel, TunnelPhase};
