#![allow(dead_code)]

use lancp_core::AppEvent;
use lancp_core::config::LancpConfig;
use lancp_core::net::{LocalEndpoints, Port};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init()
        .ok();
}

/// A loopback port that is free for both UDP and TCP right now.
pub fn free_port() -> Port {
    loop {
        let tcp = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let port = tcp.local_addr().expect("Failed to get local addr").port();
        if std::net::UdpSocket::bind(("127.0.0.1", port)).is_ok() {
            return Port::new(port as i64).expect("ephemeral port out of range");
        }
    }
}

/// Sender and receiver plans for one host, sharing the TLS port.
pub fn loopback_pair() -> (LocalEndpoints, LocalEndpoints) {
    let sender_port = free_port();
    let receiver_port = free_port();
    let tls_port = free_port();
    (
        LocalEndpoints::loopback(sender_port, receiver_port, tls_port),
        LocalEndpoints::loopback(receiver_port, sender_port, tls_port),
    )
}

pub fn test_config(download_dir: &Path) -> LancpConfig {
    LancpConfig {
        handshake_timeout_secs: 5,
        bootstrap_timeout_secs: 5,
        transfer_timeout_secs: 5,
        download_dir: download_dir.to_path_buf(),
        ..LancpConfig::default()
    }
}

/// Collect every event until all senders are dropped.
pub fn drain(mut rx: mpsc::Receiver<AppEvent>) -> JoinHandle<Vec<AppEvent>> {
    tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    })
}
