use crate::error::LancpError;
use crate::net::BoundedOperation;
use crate::{AppEvent, FileMetadata, Role};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::TransferSession;
use super::constants::CHUNK_SIZE;
use super::protocol::encode_header;
use super::utils::report_progress;

/// Stream `path` to the peer: header first, then the contents in
/// [`CHUNK_SIZE`] pieces. Each write is bounded by `deadline`.
pub async fn send_file<S>(
    stream: S,
    path: &Path,
    deadline: Duration,
    event_tx: &mpsc::Sender<AppEvent>,
) -> Result<TransferSession, LancpError>
where
    S: AsyncWrite + Unpin + Send + 'static,
{
    let fs_err = |source| LancpError::FilesystemFailure {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).await.map_err(fs_err)?;
    let total = file.metadata().await.map_err(fs_err)?.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| LancpError::Frame(format!("{} has no file name", path.display())))?;

    let metadata = FileMetadata {
        name: file_name.clone(),
        size: total,
    };
    let header = encode_header(&metadata)?;
    let header_len = header.len();
    let op = BoundedOperation::new("send file data to the receiver", deadline);

    let (mut stream, _) = write_bounded(stream, header, header_len, op).await?;
    debug!("Sent header for {} ({} bytes)", file_name, total);

    let _ = event_tx
        .send(AppEvent::TransferStarted {
            file_name: file_name.clone(),
            total,
            is_sending: true,
        })
        .await;

    let mut session = TransferSession::new(Role::Sender, total);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let start_time = Instant::now();

    while session.remaining() > 0 {
        let want = session.remaining().min(CHUNK_SIZE as u64) as usize;
        let n = file.read(&mut buf[..want]).await.map_err(fs_err)?;
        if n == 0 {
            // The file shrank after we announced its size.
            return Err(LancpError::TransferIncomplete {
                received: session.transferred,
                expected: total,
            });
        }

        let (s, b) = write_bounded(stream, buf, n, op).await?;
        stream = s;
        buf = b;
        session.transferred += n as u64;

        report_progress(
            event_tx,
            &file_name,
            session.transferred,
            total,
            start_time,
            true,
        )
        .await;
    }

    // Nothing may stay in the TLS buffer once we report success.
    let mut stream = op
        .run(async move {
            stream.flush().await?;
            Ok(stream)
        })
        .await?;

    // close_notify; the receiver may already be gone once it has every byte.
    let shutdown = op.run(async move {
        stream.shutdown().await?;
        Ok(())
    });
    if let Err(e) = shutdown.await {
        warn!("Closing the secure channel failed: {}", e);
    }

    info!("Sent {} ({} bytes)", file_name, session.transferred);
    let _ = event_tx
        .send(AppEvent::TransferCompleted {
            file_name,
            bytes: session.transferred,
            saved_path: None,
        })
        .await;

    Ok(session)
}

/// Write `buf[..len]` within the deadline, handing stream and buffer back.
async fn write_bounded<S>(
    mut stream: S,
    buf: Vec<u8>,
    len: usize,
    op: BoundedOperation,
) -> Result<(S, Vec<u8>), LancpError>
where
    S: AsyncWrite + Unpin + Send + 'static,
{
    op.run(async move {
        stream.write_all(&buf[..len]).await?;
        Ok((stream, buf))
    })
    .await
}
