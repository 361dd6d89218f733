mod common;

use lancp_core::error::{Phase, RunError};
use lancp_core::net::LocalEndpoints;
use lancp_core::passphrase::{FixedInput, Passphrase};
use lancp_core::transfer::{ReceivedFile, TransferSession};
use lancp_core::{AppEvent, RunContext, run_receiver, run_sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Outcome {
    sender: Result<TransferSession, RunError>,
    receiver: Result<ReceivedFile, RunError>,
    sender_events: Vec<AppEvent>,
    receiver_events: Vec<AppEvent>,
    receiver_ep: LocalEndpoints,
}

fn context(
    endpoints: LocalEndpoints,
    download_dir: &Path,
    own: &str,
    guess: &str,
) -> (RunContext, JoinHandle<Vec<AppEvent>>) {
    let (tx, rx) = mpsc::channel(1000);
    let ctx = RunContext {
        config: common::test_config(download_dir),
        endpoints,
        passphrase: Passphrase::new(own),
        input: Arc::new(FixedInput(guess.to_string())),
        event_tx: tx,
    };
    (ctx, common::drain(rx))
}

/// Receiver "walnut", sender "banjo"; each operator types `*_guess`.
async fn transfer(
    file: PathBuf,
    download_dir: &Path,
    sender_guess: &str,
    receiver_guess: &str,
) -> Outcome {
    common::init_logging();
    let (sender_ep, receiver_ep) = common::loopback_pair();

    let (receiver_ctx, receiver_events) =
        context(receiver_ep, download_dir, "walnut", receiver_guess);
    let receiver = tokio::spawn(run_receiver(receiver_ctx));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (sender_ctx, sender_events) = context(sender_ep, download_dir, "banjo", sender_guess);
    let sender = run_sender(sender_ctx, &file).await;

    Outcome {
        sender,
        receiver: receiver.await.expect("receiver task panicked"),
        sender_events: sender_events.await.unwrap(),
        receiver_events: receiver_events.await.unwrap(),
        receiver_ep,
    }
}

fn write_source(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    let content: Vec<u8> = (0..len).map(|i| (i * 31 % 253) as u8).collect();
    let path = dir.join(name);
    std::fs::write(&path, &content).unwrap();
    (path, content)
}

#[tokio::test]
async fn test_file_arrives_intact() {
    let source_dir = tempfile::tempdir().unwrap();
    let download_dir = tempfile::tempdir().unwrap();
    let (file, content) = write_source(source_dir.path(), "report.bin", 20_000);

    let out = transfer(file, download_dir.path(), "walnut", "banjo").await;

    let sent = out.sender.expect("sender failed");
    let received = out.receiver.expect("receiver failed");
    assert_eq!(sent.transferred, 20_000);
    assert_eq!(received.session.transferred, 20_000);
    assert_eq!(received.metadata.name, "report.bin");
    assert_eq!(received.saved_path, download_dir.path().join("report.bin"));
    assert_eq!(std::fs::read(&received.saved_path).unwrap(), content);

    assert!(out.receiver_events.iter().any(|e| matches!(
        e,
        AppEvent::ShowPassphrase { passphrase } if passphrase == "walnut"
    )));
    assert!(out
        .sender_events
        .iter()
        .any(|e| matches!(e, AppEvent::CertificateExchanged { .. })));
    assert!(out.sender_events.iter().any(|e| matches!(
        e,
        AppEvent::TransferCompleted { bytes: 20_000, saved_path: None, .. }
    )));
}

#[tokio::test]
async fn test_empty_file_is_transferred() {
    let source_dir = tempfile::tempdir().unwrap();
    let download_dir = tempfile::tempdir().unwrap();
    let (file, _) = write_source(source_dir.path(), "empty.txt", 0);

    let out = transfer(file, download_dir.path(), "walnut", "banjo").await;

    assert_eq!(out.sender.unwrap().transferred, 0);
    let received = out.receiver.unwrap();
    assert_eq!(std::fs::metadata(&received.saved_path).unwrap().len(), 0);
}

#[tokio::test]
async fn test_existing_download_is_not_overwritten() {
    let source_dir = tempfile::tempdir().unwrap();
    let download_dir = tempfile::tempdir().unwrap();
    let (file, content) = write_source(source_dir.path(), "photo.jpg", 9_000);
    std::fs::write(download_dir.path().join("photo.jpg"), b"keep me").unwrap();

    let out = transfer(file, download_dir.path(), "walnut", "banjo").await;

    let received = out.receiver.unwrap();
    assert_eq!(received.saved_path, download_dir.path().join("photo (1).jpg"));
    assert_eq!(std::fs::read(&received.saved_path).unwrap(), content);
    assert_eq!(
        std::fs::read(download_dir.path().join("photo.jpg")).unwrap(),
        b"keep me"
    );
}

#[tokio::test]
async fn test_wrong_guess_stops_before_any_connection() {
    let source_dir = tempfile::tempdir().unwrap();
    let download_dir = tempfile::tempdir().unwrap();
    let (file, _) = write_source(source_dir.path(), "secret.txt", 100);

    let out = transfer(file, download_dir.path(), "hockey", "banjo").await;

    let sender = out.sender.unwrap_err();
    let receiver = out.receiver.unwrap_err();
    for err in [&sender, &receiver] {
        assert_eq!(err.phase, Phase::Discovery);
        assert!(err.source.is_mismatch(), "got {}", err);
    }
    assert!(sender.to_string().starts_with("discovery handshake failed: "));

    for events in [&out.sender_events, &out.receiver_events] {
        assert!(!events.iter().any(|e| matches!(
            e,
            AppEvent::CertificateExchanged { .. } | AppEvent::TransferStarted { .. }
        )));
    }
    assert_eq!(std::fs::read_dir(download_dir.path()).unwrap().count(), 0);

    // Neither the certificate hand-over nor the TLS listener was ever opened.
    let ep = out.receiver_ep;
    for port in [ep.discovery_port(), ep.tls_port.get()] {
        let addr = ep.bind_addr(port);
        let refused = tokio::net::TcpStream::connect(addr).await.unwrap_err();
        assert_eq!(refused.kind(), std::io::ErrorKind::ConnectionRefused);
        tokio::net::TcpListener::bind(addr)
            .await
            .expect("port should still be free");
    }
}
