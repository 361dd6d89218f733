//! Passphrase handshake over UDP.
//!
//! The sender broadcasts its operator's guess of the receiver's passphrase;
//! the receiver checks it and answers with its operator's guess of the
//! sender's passphrase; the sender checks that and answers with a verdict.
//! Either side that spots a wrong guess sends [`REJECT_MARKER`] so that both
//! operators see an authentication failure instead of a timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{LancpError, Mismatch, SocketKind};
use crate::net::{BoundedOperation, LocalEndpoints, NetworkAddress};
use crate::passphrase::{Passphrase, PassphraseInput};
use crate::{AppEvent, Role};

/// Verdict datagrams. The leading NUL keeps them apart from any word.
pub const ACCEPT_MARKER: &[u8] = b"\x00lancp:accept";
pub const REJECT_MARKER: &[u8] = b"\x00lancp:reject";

pub const MIN_PASSPHRASE_BUF_SIZE: usize = 32;
pub const MAX_PASSPHRASE_BUF_SIZE: usize = 1024;

/// One datagram and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub payload: Vec<u8>,
    pub return_addr: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    /// Sender: about to send the operator's guess to the discovery target.
    Broadcasting { guess: String },
    /// Receiver: waiting for a sender's broadcast.
    Listening,
    /// Sender: waiting for the receiver's guess.
    AwaitingReply,
    Verifying(HandshakeMessage),
    /// Receiver: guess sent, waiting for the sender to accept or reject it.
    AwaitingVerdict { peer: SocketAddr },
    Authenticated { peer: SocketAddr },
    Failed,
}

pub struct DiscoveryHandshake {
    role: Role,
    socket: Arc<UdpSocket>,
    own_addr: SocketAddr,
    target: SocketAddr,
    expected: Passphrase,
    input: Arc<dyn PassphraseInput>,
    event_tx: mpsc::Sender<AppEvent>,
    op: BoundedOperation,
    buf_size: usize,
    state: HandshakeState,
}

impl DiscoveryHandshake {
    /// Bind the discovery socket. A port already in use is fatal.
    pub async fn bind(
        role: Role,
        endpoints: &LocalEndpoints,
        expected: Passphrase,
        input: Arc<dyn PassphraseInput>,
        event_tx: mpsc::Sender<AppEvent>,
        deadline: Duration,
        buf_size: usize,
    ) -> Result<Self, LancpError> {
        if !(MIN_PASSPHRASE_BUF_SIZE..=MAX_PASSPHRASE_BUF_SIZE).contains(&buf_size) {
            return Err(LancpError::Config(format!(
                "passphrase buffer size should be in the range [{}, {}], got: {}",
                MIN_PASSPHRASE_BUF_SIZE, MAX_PASSPHRASE_BUF_SIZE, buf_size
            )));
        }

        let addr = endpoints.bind_addr(endpoints.discovery_port());
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| LancpError::BindFailure {
                kind: SocketKind::Udp,
                addr,
                source,
            })?;
        socket.set_broadcast(true)?;
        debug!("Discovery socket bound on {}", addr);

        Ok(Self {
            role,
            socket: Arc::new(socket),
            own_addr: endpoints.local.socket_addr(),
            target: endpoints.discovery_target.socket_addr(),
            expected,
            input,
            event_tx,
            op: BoundedOperation::new("receive a passphrase from the peer", deadline),
            buf_size,
            state: HandshakeState::Idle,
        })
    }

    /// Drive the state machine to `Authenticated` and return the verified
    /// peer's discovery address. The socket is closed when this returns.
    pub async fn run(mut self) -> Result<NetworkAddress, LancpError> {
        loop {
            let next = match self.step().await {
                Ok(next) => next,
                Err(e) => {
                    self.state = HandshakeState::Failed;
                    warn!("{} handshake failed: {}", self.role, e);
                    return Err(e);
                }
            };
            if let HandshakeState::Authenticated { peer } = next {
                info!("Handshake complete, peer {} verified", peer);
                let _ = self
                    .event_tx
                    .send(AppEvent::PeerVerified {
                        peer: peer.to_string(),
                    })
                    .await;
                return Ok(NetworkAddress::try_from(peer)?);
            }
            self.state = next;
        }
    }

    async fn step(&mut self) -> Result<HandshakeState, LancpError> {
        let state = std::mem::replace(&mut self.state, HandshakeState::Idle);
        match (self.role, state) {
            (Role::Sender, HandshakeState::Idle) => {
                let guess = self.capture_guess().await?;
                Ok(HandshakeState::Broadcasting { guess })
            }
            (Role::Receiver, HandshakeState::Idle) => {
                self.show_passphrase().await;
                Ok(HandshakeState::Listening)
            }
            (_, HandshakeState::Broadcasting { guess }) => {
                self.socket.send_to(guess.as_bytes(), self.target).await?;
                debug!("Sent passphrase guess to {}", self.target);
                self.show_passphrase().await;
                Ok(HandshakeState::AwaitingReply)
            }
            (_, HandshakeState::Listening) | (_, HandshakeState::AwaitingReply) => {
                let msg = recv_datagram(
                    self.socket.clone(),
                    self.own_addr,
                    None,
                    self.buf_size,
                    self.op,
                )
                .await?;
                Ok(HandshakeState::Verifying(msg))
            }
            (role, HandshakeState::Verifying(msg)) => self.verify(role, msg).await,
            (_, HandshakeState::AwaitingVerdict { peer }) => {
                let msg = recv_datagram(
                    self.socket.clone(),
                    self.own_addr,
                    Some(peer),
                    self.buf_size,
                    self.op,
                )
                .await?;
                if msg.payload == ACCEPT_MARKER {
                    Ok(HandshakeState::Authenticated { peer })
                } else if msg.payload == REJECT_MARKER {
                    Err(LancpError::AuthenticationMismatch(
                        Mismatch::RejectedByPeer { peer },
                    ))
                } else {
                    Err(LancpError::Frame(format!(
                        "expected a verdict from {}, got {} unexpected bytes",
                        peer,
                        msg.payload.len()
                    )))
                }
            }
            (_, state @ HandshakeState::Authenticated { .. }) => Ok(state),
            (_, HandshakeState::Failed) => Err(LancpError::Frame(
                "handshake already failed".to_string(),
            )),
        }
    }

    async fn verify(
        &mut self,
        role: Role,
        msg: HandshakeMessage,
    ) -> Result<HandshakeState, LancpError> {
        let peer = msg.return_addr;

        if msg.payload == REJECT_MARKER {
            return Err(LancpError::AuthenticationMismatch(
                Mismatch::RejectedByPeer { peer },
            ));
        }

        if !self.expected.matches(&msg.payload) {
            if let Err(e) = self.socket.send_to(REJECT_MARKER, peer).await {
                warn!("Failed to tell {} its passphrase was wrong: {}", peer, e);
            }
            return Err(LancpError::AuthenticationMismatch(Mismatch::Local { peer }));
        }
        debug!("Passphrase from {} matched", peer);

        match role {
            Role::Sender => {
                self.socket.send_to(ACCEPT_MARKER, peer).await?;
                Ok(HandshakeState::Authenticated { peer })
            }
            Role::Receiver => {
                let guess = self.capture_guess().await?;
                self.socket.send_to(guess.as_bytes(), peer).await?;
                Ok(HandshakeState::AwaitingVerdict { peer })
            }
        }
    }

    async fn show_passphrase(&self) {
        info!("Passphrase generated, waiting for the peer operator");
        let _ = self
            .event_tx
            .send(AppEvent::ShowPassphrase {
                passphrase: self.expected.to_string(),
            })
            .await;
    }

    async fn capture_guess(&self) -> Result<String, LancpError> {
        let input = self.input.clone();
        let peer = self.role.peer();
        let guess = tokio::task::spawn_blocking(move || input.capture(peer))
            .await
            .map_err(|e| LancpError::Task {
                action: "read the operator's passphrase",
                message: e.to_string(),
            })??;
        Ok(guess.trim().to_string())
    }
}

/// Wait for one datagram, skipping our own broadcasts (one extra read per
/// self-delivery) and, when `from_only` is set, anything from other hosts.
pub async fn recv_datagram(
    socket: Arc<UdpSocket>,
    own_addr: SocketAddr,
    from_only: Option<SocketAddr>,
    buf_size: usize,
    op: BoundedOperation,
) -> Result<HandshakeMessage, LancpError> {
    op.run(async move {
        let mut buf = vec![0u8; buf_size];
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            if from == own_addr {
                debug!("Discarding our own datagram");
                continue;
            }
            if let Some(expected) = from_only {
                if from != expected {
                    debug!("Ignoring datagram from unrelated host {}", from);
                    continue;
                }
            }
            return Ok(HandshakeMessage {
                payload: buf[..n].to_vec(),
                return_addr: from,
            });
        }
    })
    .await
}
