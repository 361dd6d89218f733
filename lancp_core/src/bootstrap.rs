//! Trust bootstrap: the receiver mints a short-lived self-signed certificate
//! and hands its public half to the sender over a one-shot plain TCP
//! connection. Nothing secret crosses that connection.

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{LancpError, SocketKind};
use crate::net::{BoundedOperation, LocalEndpoints, NetworkAddress, dial_tcp};

/// Long enough to absorb clock skew between the two machines, short enough
/// that the certificate is useless after this session.
pub const CERT_VALIDITY: Duration = Duration::from_secs(2 * 60);
pub const CERT_ORGANIZATION: &str = "lancp";

/// Upper bound on what the sender accepts as a certificate.
const MAX_CERT_BYTES: u64 = 64 * 1024;

/// PEM-encoded certificate and private key. Only the receiver ever holds one
/// of these; the key never leaves the process.
pub struct SelfSignedCertificate {
    cert_pem: String,
    key_pem: String,
    pub valid_from: SystemTime,
    pub valid_until: SystemTime,
}

impl SelfSignedCertificate {
    pub fn certificate_pem(&self) -> &[u8] {
        self.cert_pem.as_bytes()
    }

    pub fn certificate_der(&self) -> Result<CertificateDer<'static>, LancpError> {
        parse_certificate(self.cert_pem.as_bytes())
    }

    pub fn private_key_der(&self) -> Result<PrivateKeyDer<'static>, LancpError> {
        PrivateKeyDer::from_pem_slice(self.key_pem.as_bytes())
            .map_err(|e| LancpError::Certificate(format!("unreadable private key: {:?}", e)))
    }
}

impl std::fmt::Debug for SelfSignedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfSignedCertificate")
            .field("valid_from", &self.valid_from)
            .field("valid_until", &self.valid_until)
            .finish_non_exhaustive()
    }
}

/// Create a key pair and a certificate for `ip`, signed by itself.
pub fn generate_certificate(ip: Ipv4Addr) -> Result<SelfSignedCertificate, LancpError> {
    let key_pair = KeyPair::generate()?;

    let mut params = CertificateParams::default();
    params.subject_alt_names = vec![SanType::IpAddress(IpAddr::V4(ip))];
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, CERT_ORGANIZATION);
    dn.push(DnType::CommonName, ip.to_string());
    params.distinguished_name = dn;
    // Must stay a leaf: the sender uses it both as trust anchor and as the
    // end-entity certificate.
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let now = OffsetDateTime::now_utc();
    let expires = now + CERT_VALIDITY;
    params.not_before = now;
    params.not_after = expires;

    let cert = params.self_signed(&key_pair)?;
    debug!("Generated self-signed certificate for {}", ip);

    Ok(SelfSignedCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        valid_from: SystemTime::from(now),
        valid_until: SystemTime::from(expires),
    })
}

/// Parse the first PEM certificate in `pem`.
pub fn parse_certificate(pem: &[u8]) -> Result<CertificateDer<'static>, LancpError> {
    CertificateDer::from_pem_slice(pem)
        .map_err(|e| LancpError::Certificate(format!("unreadable certificate: {:?}", e)))
}

/// Receiver side: listen on the discovery port, hand the certificate to the
/// verified peer, then close the connection and the listener.
///
/// Connections from any other host are dropped unanswered.
pub async fn distribute_certificate(
    cert: &SelfSignedCertificate,
    endpoints: &LocalEndpoints,
    peer_ip: Ipv4Addr,
    op: BoundedOperation,
) -> Result<SocketAddr, LancpError> {
    let addr = endpoints.bind_addr(endpoints.discovery_port());
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| LancpError::BindFailure {
            kind: SocketKind::Tcp,
            addr,
            source,
        })?;
    debug!("Certificate listener bound on {}", addr);

    let payload = cert.certificate_pem().to_vec();
    let sent_to = op
        .run(async move {
            let (mut stream, from) = loop {
                let (stream, from) = listener.accept().await?;
                if from.ip() == IpAddr::V4(peer_ip) {
                    break (stream, from);
                }
                warn!("Refusing certificate request from unverified host {}", from);
            };
            // Listener goes away before we report success, so the TLS
            // listener can take over the port.
            drop(listener);

            stream.write_all(&payload).await?;
            stream.shutdown().await?;
            Ok(from)
        })
        .await?;

    info!("Certificate sent to {}", sent_to);
    Ok(sent_to)
}

/// Sender side: connect to the peer's discovery address and read the
/// certificate until the peer closes the connection.
pub async fn fetch_certificate(
    peer: NetworkAddress,
    op: BoundedOperation,
) -> Result<Vec<u8>, LancpError> {
    let addr = peer.socket_addr();
    let pem = op
        .run(async move {
            let stream = dial_tcp(addr).await?;
            let mut pem = Vec::new();
            stream.take(MAX_CERT_BYTES).read_to_end(&mut pem).await?;
            Ok(pem)
        })
        .await?;

    if pem.is_empty() {
        return Err(LancpError::Certificate(format!(
            "{} closed the connection without sending a certificate",
            peer
        )));
    }
    parse_certificate(&pem)?;
    info!("Received certificate from {} ({} bytes)", peer, pem.len());
    Ok(pem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_is_short_lived() {
        let cert = generate_certificate(Ipv4Addr::new(192, 168, 0, 42)).unwrap();
        let window = cert.valid_until.duration_since(cert.valid_from).unwrap();
        assert_eq!(window, CERT_VALIDITY);
        assert!(cert.valid_from <= SystemTime::now());
    }

    #[test]
    fn test_certificate_pem_round_trips() {
        let cert = generate_certificate(Ipv4Addr::LOCALHOST).unwrap();
        let pem = std::str::from_utf8(cert.certificate_pem()).unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(cert.certificate_der().is_ok());
        assert!(cert.private_key_der().is_ok());
    }

    #[test]
    fn test_each_certificate_is_fresh() {
        let a = generate_certificate(Ipv4Addr::LOCALHOST).unwrap();
        let b = generate_certificate(Ipv4Addr::LOCALHOST).unwrap();
        assert_ne!(a.certificate_pem(), b.certificate_pem());
    }

    #[test]
    fn test_debug_hides_key() {
        let cert = generate_certificate(Ipv4Addr::LOCALHOST).unwrap();
        assert!(!format!("{:?}", cert).contains("PRIVATE KEY"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_certificate(b"not a certificate"),
            Err(LancpError::Certificate(_))
        ));
    }
}
