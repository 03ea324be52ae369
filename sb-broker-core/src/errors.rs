//! Error taxonomy (spec §7): `validation`, `crypto`, `protocol`, `transport`,
//! `resource`. Hand-rolled like the teacher's `InvocationError` — no
//! `thiserror` macro.

use std::fmt;

use sb_broker_proto::{codec::CodecError, TunnelError};

#[derive(Debug, Clone)]
pub enum BrokerError {
    Validation(String),
    Crypto(String),
    Protocol(String),
    Transport(String),
    Resource(String),
}

impl BrokerError {
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Validation(_) => "validation",
            BrokerError::Crypto(_) => "crypto",
            BrokerError::Protocol(_) => "protocol",
            BrokerError::Transport(_) => "transport",
            BrokerError::Resource(_) => "resource",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BrokerError::Validation(m)
            | BrokerError::Crypto(m)
            | BrokerError::Protocol(m)
            | BrokerError::Transport(m)
            | BrokerError::Resource(m) => m,
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for BrokerError {}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        BrokerError::Transport(e.to_string())
    }
}

impl From<TunnelError> for BrokerError {
    fn from(e: TunnelError) -> Self {
        BrokerError::Crypto(e.to_string())
    }
}

impl From<CodecError> for BrokerError {
    fn from(e: CodecError) -> Self {
        BrokerError::Protocol(e.to_string())
    }
}

/// Mirrors the original `struct api_error`: an error slot that handlers
/// populate at most once, with an `isset` flag distinguishing "no error"
/// from "error with an empty message".
#[derive(Debug, Clone, Default)]
pub struct ApiError {
    error: Option<BrokerError>,
}

impl ApiError {
    pub fn new() -> Self {
        Self { error: None }
    }

    pub fn set(&mut self, error: BrokerError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn is_set(&self) -> bool {
        self.error.is_some()
    }

    pub fn take(self) -> Option<BrokerError> {
        self.error
    }

    pub fn as_ref(&self) -> Option<&BrokerError> {
        self.error.as_ref()
    }
}
