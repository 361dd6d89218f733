//! Header framing: `[name_len: u16 BE][name][size: varint in 10 bytes]`,
//! followed on the wire by exactly `size` payload bytes.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::codec::{decode_varint, encode_varint};
use super::constants::{MAX_NAME_LEN, SIZE_FRAME_LEN};
use crate::FileMetadata;
use crate::error::LancpError;

/// Serialize the name and size header.
pub fn encode_header(meta: &FileMetadata) -> Result<Vec<u8>, LancpError> {
    let name = meta.name.as_bytes();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(LancpError::Frame(format!(
            "file name must be 1 to {} bytes, got {}",
            MAX_NAME_LEN,
            name.len()
        )));
    }
    let size = i64::try_from(meta.size)
        .map_err(|_| LancpError::Frame(format!("file size {} is too large", meta.size)))?;

    let mut frame = Vec::with_capacity(2 + name.len() + SIZE_FRAME_LEN);
    frame.extend_from_slice(&(name.len() as u16).to_be_bytes());
    frame.extend_from_slice(name);
    frame.extend_from_slice(&encode_varint(size));
    Ok(frame)
}

/// Read the name and size header.
pub async fn read_header<R>(stream: &mut R) -> Result<FileMetadata, LancpError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| eof_as_frame(e, "file name length"))?;
    let name_len = u16::from_be_bytes(len_buf) as usize;
    if name_len == 0 || name_len > MAX_NAME_LEN {
        return Err(LancpError::Frame(format!(
            "file name length {} outside 1..={}",
            name_len, MAX_NAME_LEN
        )));
    }

    let mut name_buf = vec![0u8; name_len];
    stream
        .read_exact(&mut name_buf)
        .await
        .map_err(|e| eof_as_frame(e, "file name"))?;
    let name = String::from_utf8(name_buf)
        .map_err(|_| LancpError::Frame("file name is not valid UTF-8".to_string()))?;

    let mut size_buf = [0u8; SIZE_FRAME_LEN];
    stream
        .read_exact(&mut size_buf)
        .await
        .map_err(|e| eof_as_frame(e, "file size"))?;
    let (size, _) = decode_varint(&size_buf)?;
    let size = u64::try_from(size)
        .map_err(|_| LancpError::Frame(format!("negative file size {}", size)))?;

    Ok(FileMetadata { name, size })
}

fn eof_as_frame(e: io::Error, field: &str) -> LancpError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        LancpError::Frame(format!("connection closed before the {} arrived", field))
    } else {
        LancpError::Io(e)
    }
}
