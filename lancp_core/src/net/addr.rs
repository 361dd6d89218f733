use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::str::FromStr;
use thiserror::Error;

pub const MIN_VALID_PORT: u32 = 1025;
pub const MAX_VALID_PORT: u32 = 65535;

/// Address we "connect" a throwaway UDP socket to in order to learn which
/// local interface the OS would route through. No packet is sent.
const OUTBOUND_PROBE_ADDR: &str = "8.8.8.8:80";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrError {
    #[error("port must be in the range [1025, 65535], got: {0}")]
    PortOutOfRange(i64),
    #[error("invalid port string {0:?}, expected \":NNNN\"")]
    Malformed(String),
    #[error("no usable IPv4 address found on this machine")]
    NoIpv4Address,
    #[error("{0} is not an IPv4 address")]
    NotIpv4(SocketAddr),
}

/// A validated, non-privileged port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Port(u16);

impl Port {
    pub fn new(port: i64) -> Result<Self, AddrError> {
        if port < MIN_VALID_PORT as i64 || port > MAX_VALID_PORT as i64 {
            return Err(AddrError::PortOutOfRange(port));
        }
        Ok(Port(port as u16))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

/// Renders as `:PPPP`.
impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl FromStr for Port {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(':')
            .ok_or_else(|| AddrError::Malformed(s.to_string()))?;
        let n: i64 = digits
            .parse()
            .map_err(|_| AddrError::Malformed(s.to_string()))?;
        Port::new(n)
    }
}

/// `port_as_string(4242) == ":4242"`.
pub fn port_as_string(port: i64) -> Result<String, AddrError> {
    Port::new(port).map(|p| p.to_string())
}

/// An IPv4 host and port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self { host, port }
    }

    /// Same host, different port. Used to turn the peer's discovery address
    /// into its TLS address.
    pub fn with_port(self, port: Port) -> Self {
        Self {
            host: self.host,
            port: port.get(),
        }
    }

    /// The subnet broadcast address for this host: last octet set to 255.
    pub fn broadcast(self) -> Self {
        let [a, b, c, _] = self.host.octets();
        Self {
            host: Ipv4Addr::new(a, b, c, 255),
            port: self.port,
        }
    }

    pub fn socket_addr(self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddrV4> for NetworkAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl TryFrom<SocketAddr> for NetworkAddress {
    type Error = AddrError;

    fn try_from(addr: SocketAddr) -> Result<Self, Self::Error> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(ip) => Ok(Self::new(ip, v6.port())),
                None => Err(AddrError::NotIpv4(addr)),
            },
        }
    }
}

/// `broadcast_address(192.168.0.69, 8080)` renders as `192.168.0.255:8080`.
pub fn broadcast_address(ip: Ipv4Addr, port: i64) -> Result<NetworkAddress, AddrError> {
    let port = Port::new(port)?;
    Ok(NetworkAddress::new(ip, port.get()).broadcast())
}

/// This machine's preferred outbound IPv4 address on the local network.
pub fn preferred_outbound_ip() -> Result<Ipv4Addr, AddrError> {
    match probe_outbound_ip() {
        Ok(ip) => Ok(ip),
        Err(e) => {
            tracing::debug!("Outbound route probe failed ({}), scanning interfaces", e);
            best_interface_ip().ok_or(AddrError::NoIpv4Address)
        }
    }
}

fn probe_outbound_ip() -> std::io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(OUTBOUND_PROBE_ADDR)?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("unexpected local address {}", other),
        )),
    }
}

/// Pick a LAN address, preferring 192.168.x.x, then 10.x.x.x, then 172.x.x.x.
fn best_interface_ip() -> Option<Ipv4Addr> {
    let ips = local_ip_address::list_afinet_netifas().ok()?;
    let mut best_ip: Option<Ipv4Addr> = None;
    let mut best_rank = u8::MAX;
    for (_name, ip) in ips {
        let IpAddr::V4(ip) = ip else {
            continue;
        };
        if ip.is_loopback() {
            continue;
        }
        let rank = match ip.octets() {
            [192, 168, ..] => 0,
            [10, ..] => 1,
            [172, ..] => 2,
            _ => 3,
        };
        if rank < best_rank {
            best_rank = rank;
            best_ip = Some(ip);
        }
    }
    best_ip
}

/// Where this side lives on the network for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEndpoints {
    /// Our own address as the peer sees it; used to drop self-deliveries and
    /// as the certificate's IP SAN.
    pub local: NetworkAddress,
    /// Interface the UDP, TCP and TLS sockets bind to.
    pub bind_ip: Ipv4Addr,
    /// Target of the sender's first datagram.
    pub discovery_target: NetworkAddress,
    pub tls_port: Port,
}

impl LocalEndpoints {
    /// Production plan: bind all interfaces, broadcast on our /24.
    pub fn lan(port: Port, tls_port: Port) -> Result<Self, AddrError> {
        let ip = preferred_outbound_ip()?;
        let local = NetworkAddress::new(ip, port.get());
        Ok(Self {
            local,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            discovery_target: local.broadcast(),
            tls_port,
        })
    }

    /// Single-host plan: both sides on 127.0.0.1 with distinct discovery
    /// ports, the first datagram sent straight to `peer_port`.
    pub fn loopback(port: Port, peer_port: Port, tls_port: Port) -> Self {
        Self {
            local: NetworkAddress::new(Ipv4Addr::LOCALHOST, port.get()),
            bind_ip: Ipv4Addr::LOCALHOST,
            discovery_target: NetworkAddress::new(Ipv4Addr::LOCALHOST, peer_port.get()),
            tls_port,
        }
    }

    pub fn bind_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_ip, port))
    }

    pub fn discovery_port(&self) -> u16 {
        self.local.port
    }
}
