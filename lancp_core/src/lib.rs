use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub mod bootstrap;
pub mod config;
pub mod discovery;
pub mod error;
pub mod net;
pub mod passphrase;
pub mod tls;
pub mod transfer;

use config::LancpConfig;
use discovery::DiscoveryHandshake;
use error::{Phase, PhaseExt};
use net::{BoundedOperation, LocalEndpoints};
use passphrase::{Passphrase, PassphraseInput};
use transfer::{ReceivedFile, TransferSession};

pub use error::{LancpError, RunError};

/// Which end of a transfer this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// Name and size announced ahead of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
}

//Report from Core to the operator
#[derive(Debug, Clone)]
pub enum AppEvent {
    Status(String),

    /// Our own passphrase, to be read out to the other operator
    ShowPassphrase {
        passphrase: String,
    },

    PeerVerified {
        peer: String,
    },

    CertificateExchanged {
        bytes: usize,
    },

    TransferStarted {
        file_name: String,
        total: u64,
        is_sending: bool,
    },

    TransferProgress {
        file_name: String,
        transferred: u64,
        total: u64,
        progress: f32,
        speed: String,
        is_sending: bool,
    },

    /// `saved_path` is set on the receiving side only
    TransferCompleted {
        file_name: String,
        bytes: u64,
        saved_path: Option<PathBuf>,
    },
}

/// Everything one run needs besides the file to send.
pub struct RunContext {
    pub config: LancpConfig,
    pub endpoints: LocalEndpoints,
    /// The passphrase the peer's operator has to type in.
    pub passphrase: Passphrase,
    pub input: Arc<dyn PassphraseInput>,
    pub event_tx: mpsc::Sender<AppEvent>,
}

impl RunContext {
    /// Context with a freshly generated passphrase.
    pub fn new(
        config: LancpConfig,
        endpoints: LocalEndpoints,
        input: Arc<dyn PassphraseInput>,
        event_tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        Self {
            config,
            endpoints,
            passphrase: passphrase::PassphraseGenerator::from_os_rng().generate(),
            input,
            event_tx,
        }
    }

    async fn status(&self, message: String) {
        let _ = self.event_tx.send(AppEvent::Status(message)).await;
    }

    async fn handshake(&self, role: Role) -> Result<net::NetworkAddress, LancpError> {
        DiscoveryHandshake::bind(
            role,
            &self.endpoints,
            self.passphrase.clone(),
            self.input.clone(),
            self.event_tx.clone(),
            self.config.handshake_timeout(),
            self.config.passphrase_buffer_size,
        )
        .await?
        .run()
        .await
    }
}

/// Authenticate the receiver, fetch its certificate, open the secure channel
/// and stream `file` to it.
pub async fn run_sender(ctx: RunContext, file: &Path) -> Result<TransferSession, RunError> {
    info!("Starting sender on {}", ctx.endpoints.local);

    let peer = ctx.handshake(Role::Sender).await.in_phase(Phase::Discovery)?;

    let cert_pem = bootstrap::fetch_certificate(
        peer,
        BoundedOperation::new(
            "receive the certificate from the receiver",
            ctx.config.bootstrap_timeout(),
        ),
    )
    .await
    .in_phase(Phase::TrustBootstrap)?;
    let _ = ctx
        .event_tx
        .send(AppEvent::CertificateExchanged {
            bytes: cert_pem.len(),
        })
        .await;

    let tls_config = tls::sender_config(&cert_pem).in_phase(Phase::SecureChannel)?;
    let stream = tls::dial(
        peer.with_port(ctx.endpoints.tls_port),
        tls_config,
        BoundedOperation::new("establish the secure channel", ctx.config.transfer_timeout()),
    )
    .await
    .in_phase(Phase::SecureChannel)?;
    ctx.status(format!("Secure channel open to {}", peer.host)).await;

    transfer::send_file(stream, file, ctx.config.transfer_timeout(), &ctx.event_tx)
        .await
        .in_phase(Phase::Transfer)
}

/// Authenticate the sender, hand it a fresh certificate, accept its secure
/// channel and receive one file into the configured download directory.
pub async fn run_receiver(ctx: RunContext) -> Result<ReceivedFile, RunError> {
    info!("Starting receiver on {}", ctx.endpoints.local);

    let peer = ctx
        .handshake(Role::Receiver)
        .await
        .in_phase(Phase::Discovery)?;

    let cert = bootstrap::generate_certificate(ctx.endpoints.local.host)
        .in_phase(Phase::TrustBootstrap)?;
    bootstrap::distribute_certificate(
        &cert,
        &ctx.endpoints,
        peer.host,
        BoundedOperation::new(
            "hand the certificate to the sender",
            ctx.config.bootstrap_timeout(),
        ),
    )
    .await
    .in_phase(Phase::TrustBootstrap)?;
    let _ = ctx
        .event_tx
        .send(AppEvent::CertificateExchanged {
            bytes: cert.certificate_pem().len(),
        })
        .await;

    let tls_config = tls::receiver_config(&cert).in_phase(Phase::SecureChannel)?;
    let listener = tls::listen(tls_config, &ctx.endpoints)
        .await
        .in_phase(Phase::SecureChannel)?;
    let stream = tls::accept(
        listener,
        peer.host,
        BoundedOperation::new("accept the secure channel", ctx.config.transfer_timeout()),
    )
    .await
    .in_phase(Phase::SecureChannel)?;
    ctx.status(format!("Secure channel open from {}", peer.host)).await;

    transfer::receive_file(
        stream,
        &ctx.config.download_dir,
        ctx.config.transfer_timeout(),
        &ctx.event_tx,
    )
    .await
    .in_phase(Phase::Transfer)
}
