//! Error taxonomy shared by every phase of a run.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::net::addr::AddrError;
use crate::transfer::codec::VarintError;

/// Which kind of socket a bind failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Udp,
    Tcp,
    Tls,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketKind::Udp => write!(f, "UDP"),
            SocketKind::Tcp => write!(f, "TCP"),
            SocketKind::Tls => write!(f, "TLS"),
        }
    }
}

/// Who noticed that a passphrase was wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// We compared the peer's guess against our own passphrase.
    Local { peer: SocketAddr },
    /// The peer told us our guess was wrong.
    RejectedByPeer { peer: SocketAddr },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Local { peer } => {
                write!(f, "passphrase received from {} does not match ours", peer)
            }
            Mismatch::RejectedByPeer { peer } => {
                write!(f, "{} rejected the passphrase we entered", peer)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum LancpError {
    /// The port is already taken or otherwise unavailable.
    #[error("failed to bind {kind} socket on {addr}: {source}")]
    BindFailure {
        kind: SocketKind,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {waited:?} waiting to {action}")]
    Timeout {
        action: &'static str,
        waited: Duration,
    },

    #[error("authentication failed: {0}")]
    AuthenticationMismatch(Mismatch),

    #[error("TLS handshake with {peer} failed: {source}")]
    TlsHandshakeFailure {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer incomplete: received {received} of {expected} bytes")]
    TransferIncomplete { received: u64, expected: u64 },

    #[error("filesystem error on {}: {source}", path.display())]
    FilesystemFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    InvalidAddress(#[from] AddrError),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("invalid TLS configuration: {0}")]
    TlsConfig(#[from] rustls::Error),

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("failed to decode file size: {0}")]
    Varint(#[from] VarintError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task for {action} failed: {message}")]
    Task {
        action: &'static str,
        message: String,
    },
}

impl LancpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LancpError::Timeout { .. })
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, LancpError::AuthenticationMismatch(_))
    }
}

impl From<rcgen::Error> for LancpError {
    fn from(e: rcgen::Error) -> Self {
        LancpError::Certificate(e.to_string())
    }
}

/// The protocol phase a run was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovery,
    TrustBootstrap,
    SecureChannel,
    Transfer,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Discovery => write!(f, "discovery handshake"),
            Phase::TrustBootstrap => write!(f, "certificate exchange"),
            Phase::SecureChannel => write!(f, "secure channel setup"),
            Phase::Transfer => write!(f, "file transfer"),
        }
    }
}

/// Terminal error of a sender or receiver run.
#[derive(Debug, Error)]
#[error("{phase} failed: {source}")]
pub struct RunError {
    pub phase: Phase,
    #[source]
    pub source: LancpError,
}

impl RunError {
    pub fn new(phase: Phase, source: LancpError) -> Self {
        Self { phase, source }
    }
}

/// Attach a phase to a phase-local result.
pub trait PhaseExt<T> {
    fn in_phase(self, phase: Phase) -> Result<T, RunError>;
}

impl<T> PhaseExt<T> for Result<T, LancpError> {
    fn in_phase(self, phase: Phase) -> Result<T, RunError> {
        self.map_err(|e| RunError::new(phase, e))
    }
}
