use crate::error::LancpError;
use crate::net::BoundedOperation;
use crate::{AppEvent, FileMetadata, Role};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::constants::CHUNK_SIZE;
use super::protocol::read_header;
use super::utils::{create_new_file_on_disk, report_progress, sanitize_file_name};
use super::{ReceivedFile, TransferSession};

/// Receive one file into `download_dir`.
///
/// The announced name is sanitized and never overwrites an existing file.
/// If the stream ends early the partial file is removed and
/// `TransferIncomplete` is returned.
pub async fn receive_file<S>(
    stream: S,
    download_dir: &Path,
    deadline: Duration,
    event_tx: &mpsc::Sender<AppEvent>,
) -> Result<ReceivedFile, LancpError>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    let (stream, metadata) = BoundedOperation::new("receive the file name and size", deadline)
        .run(async move {
            let mut stream = stream;
            let metadata = read_header(&mut stream).await?;
            Ok((stream, metadata))
        })
        .await?;
    debug!("Incoming file {:?} ({} bytes)", metadata.name, metadata.size);

    let safe_name = sanitize_file_name(&metadata.name);
    tokio::fs::create_dir_all(download_dir)
        .await
        .map_err(|source| LancpError::FilesystemFailure {
            path: download_dir.to_path_buf(),
            source,
        })?;
    let (file, saved_path) = create_new_file_on_disk(download_dir, &safe_name).await?;

    let _ = event_tx
        .send(AppEvent::TransferStarted {
            file_name: safe_name.clone(),
            total: metadata.size,
            is_sending: false,
        })
        .await;

    let op = BoundedOperation::new("receive file data from the sender", deadline);
    let payload = receive_payload(
        stream,
        file,
        &saved_path,
        &safe_name,
        &metadata,
        op,
        event_tx,
    );
    let session = match payload.await {
        Ok(session) => session,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&saved_path).await {
                warn!("Could not remove partial file {}: {}", saved_path.display(), rm);
            }
            return Err(e);
        }
    };

    info!(
        "Received {} ({} bytes) into {}",
        safe_name,
        session.transferred,
        saved_path.display()
    );
    let _ = event_tx
        .send(AppEvent::TransferCompleted {
            file_name: safe_name,
            bytes: session.transferred,
            saved_path: Some(saved_path.clone()),
        })
        .await;

    Ok(ReceivedFile {
        metadata,
        saved_path,
        session,
    })
}

async fn receive_payload<S>(
    mut stream: S,
    mut file: File,
    saved_path: &Path,
    file_name: &str,
    metadata: &FileMetadata,
    op: BoundedOperation,
    event_tx: &mpsc::Sender<AppEvent>,
) -> Result<TransferSession, LancpError>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    let fs_err = |source| LancpError::FilesystemFailure {
        path: saved_path.to_path_buf(),
        source,
    };
    let mut session = TransferSession::new(Role::Receiver, metadata.size);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let start_time = Instant::now();

    while session.remaining() > 0 {
        let want = session.remaining().min(CHUNK_SIZE as u64) as usize;
        let (s, b, n) = read_bounded(stream, buf, want, op).await?;
        stream = s;
        buf = b;
        if n == 0 {
            return Err(LancpError::TransferIncomplete {
                received: session.transferred,
                expected: session.total,
            });
        }

        file.write_all(&buf[..n]).await.map_err(fs_err)?;
        session.transferred += n as u64;

        report_progress(
            event_tx,
            file_name,
            session.transferred,
            session.total,
            start_time,
            false,
        )
        .await;
    }

    file.flush().await.map_err(fs_err)?;
    Ok(session)
}

/// One bounded read of up to `want` bytes. A peer that vanishes without a
/// clean close reads as end of stream.
async fn read_bounded<S>(
    mut stream: S,
    mut buf: Vec<u8>,
    want: usize,
    op: BoundedOperation,
) -> Result<(S, Vec<u8>, usize), LancpError>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    op.run(async move {
        let n = match stream.read(&mut buf[..want]).await {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(e.into()),
        };
        Ok((stream, buf, n))
    })
    .await
}
