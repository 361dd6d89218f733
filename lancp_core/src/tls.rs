//! Secure channel: TLS over TCP, authenticated by the single certificate
//! handed over during the trust bootstrap.

use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector, client, server};
use tracing::{debug, info, warn};

use crate::bootstrap::{SelfSignedCertificate, parse_certificate};
use crate::error::{LancpError, SocketKind};
use crate::net::{BoundedOperation, LocalEndpoints, NetworkAddress, dial_tcp};

/// ALPN id offered by the sender and required by the receiver.
pub const ALPN_PROTOCOL: &[u8] = b"lancp/2";

pub type ReceiverStream = server::TlsStream<TcpStream>;
pub type SenderStream = client::TlsStream<TcpStream>;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Server side: present our certificate, ask nothing of the client.
pub fn receiver_config(cert: &SelfSignedCertificate) -> Result<Arc<ServerConfig>, LancpError> {
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(vec![cert.certificate_der()?], cert.private_key_der()?)?;
    config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    Ok(Arc::new(config))
}

/// Client side: trust exactly the certificate fetched from the peer.
pub fn sender_config(cert_pem: &[u8]) -> Result<Arc<ClientConfig>, LancpError> {
    let mut roots = RootCertStore::empty();
    roots.add(parse_certificate(cert_pem)?)?;

    let mut config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    Ok(Arc::new(config))
}

/// A bound TLS listener that has not accepted anyone yet.
pub struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Bind the TLS port.
pub async fn listen(
    config: Arc<ServerConfig>,
    endpoints: &LocalEndpoints,
) -> Result<TlsListener, LancpError> {
    let addr = endpoints.bind_addr(endpoints.tls_port.get());
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| LancpError::BindFailure {
            kind: SocketKind::Tls,
            addr,
            source,
        })?;
    debug!("TLS listener bound on {}", addr);
    Ok(TlsListener {
        listener,
        acceptor: TlsAcceptor::from(config),
    })
}

/// Accept one connection from `peer_ip` and complete the handshake. The
/// listener is closed as soon as that connection arrives.
pub async fn accept(
    listener: TlsListener,
    peer_ip: Ipv4Addr,
    op: BoundedOperation,
) -> Result<ReceiverStream, LancpError> {
    let stream = op
        .run(async move {
            let TlsListener { listener, acceptor } = listener;
            let (tcp, from) = loop {
                let (tcp, from) = listener.accept().await?;
                if from.ip() == IpAddr::V4(peer_ip) {
                    break (tcp, from);
                }
                warn!("Refusing TLS connection from unverified host {}", from);
            };
            drop(listener);

            acceptor
                .accept(tcp)
                .await
                .map_err(|source| LancpError::TlsHandshakeFailure { peer: from, source })
        })
        .await?;

    info!("Secure channel established with {}", peer_ip);
    Ok(stream)
}

/// Connect to the receiver's TLS port and verify it against `config`. The
/// expected server name is the peer's IP address.
pub async fn dial(
    peer: NetworkAddress,
    config: Arc<ClientConfig>,
    op: BoundedOperation,
) -> Result<SenderStream, LancpError> {
    let addr = peer.socket_addr();
    let server_name = ServerName::from(IpAddr::V4(peer.host));
    let connector = TlsConnector::from(config);

    let stream = op
        .run(async move {
            let tcp = dial_tcp(addr).await?;
            connector
                .connect(server_name, tcp)
                .await
                .map_err(|source| LancpError::TlsHandshakeFailure { peer: addr, source })
        })
        .await?;

    info!("Secure channel established with {}", peer);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::generate_certificate;

    #[test]
    fn test_configs_build_from_fresh_certificate() {
        let cert = generate_certificate(Ipv4Addr::LOCALHOST).unwrap();
        let server = receiver_config(&cert).unwrap();
        let client = sender_config(cert.certificate_pem()).unwrap();
        assert_eq!(server.alpn_protocols, vec![ALPN_PROTOCOL.to_vec()]);
        assert_eq!(client.alpn_protocols, vec![ALPN_PROTOCOL.to_vec()]);
    }

    #[test]
    fn test_sender_config_rejects_garbage() {
        assert!(matches!(
            sender_config(b"-----BEGIN NOTHING-----"),
            Err(LancpError::Certificate(_))
        ));
    }
}
