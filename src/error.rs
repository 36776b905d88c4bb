use std::{io, net::SocketAddr, time::Duration};
use thiserror::Error;

/// DecodeError covers malformed greeting/request bytes
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("not enough data: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("not SOCKS5: version byte {0:#04x}")]
    BadVersion(u8),

    #[error("unsupported or unknown address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("address bytes are not ASCII text")]
    NonAsciiAddress,

    #[error("invalid domain: {0}")]
    InvalidDomain(#[from] std::string::FromUtf8Error),
}

/// ProxyError is everything that can go wrong inside a single session.
/// None of these escape the session that produced them.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("protocol decode error: {0}")]
    ProtocolDecode(#[from] DecodeError),

    #[error("failed to resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no address found for {0}")]
    NoCandidates(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("outbound write failed: {0}")]
    RelayWrite(#[source] io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("no transition for {0} bytes in current stage")]
    StageViolation(usize),
}

impl ProxyError {
    /// is_resolution reports lookup failures, both errors and empty results
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            ProxyError::Resolution { .. } | ProxyError::NoCandidates(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
