use crate::AppEvent;
use crate::error::LancpError;
use crate::transfer::constants::MAX_FILENAME_LENGTH;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::sync::mpsc;

/// Create `name` inside `dir` without ever replacing an existing file.
///
/// On collision the name gets a counter before the extension:
/// `a.txt`, `a (1).txt`, `a (2).txt`, ...
pub async fn create_new_file_on_disk(dir: &Path, name: &str) -> Result<(File, PathBuf), LancpError> {
    let mut candidate = dir.join(name);
    let mut version: u32 = 1;
    loop {
        match open_new_file(&candidate).await {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                candidate = dir.join(versioned_name(name, version));
                version += 1;
            }
            Err(source) => {
                return Err(LancpError::FilesystemFailure {
                    path: candidate,
                    source,
                });
            }
        }
    }
}

/// Exclusive create with owner-only permissions on Unix.
async fn open_new_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

fn versioned_name(name: &str, version: u32) -> String {
    let path = Path::new(name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) => format!("{} ({}).{}", stem, version, ext),
        _ => format!("{} ({})", name, version),
    }
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "Starting...".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Reduce a name received from the network to a safe base name.
pub fn sanitize_file_name(file_name: &str) -> String {
    // Last component only, splitting on both separators.
    let file_name = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("unknown_file");

    let mut clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved_names
        .iter()
        .any(|&r| clean_name.eq_ignore_ascii_case(r))
    {
        return "unknown_file".to_string();
    }

    if clean_name == ".." || clean_name == "." || clean_name.trim().is_empty() {
        return "unknown_file".to_string();
    }

    if clean_name.len() > MAX_FILENAME_LENGTH {
        clean_name = truncate_keeping_extension(&clean_name);
    }

    clean_name
}

fn truncate_keeping_extension(name: &str) -> String {
    let ext_len = name.rfind('.').map(|idx| name.len() - idx);
    match ext_len {
        Some(ext_len) if ext_len < 20 => {
            let idx = name.len() - ext_len;
            let mut base = name[..idx].to_string();
            truncate_on_char_boundary(&mut base, MAX_FILENAME_LENGTH - ext_len);
            base.push_str(&name[idx..]);
            base
        }
        _ => {
            let mut name = name.to_string();
            truncate_on_char_boundary(&mut name, MAX_FILENAME_LENGTH);
            name
        }
    }
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    let mut cutoff = max.min(s.len());
    while !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s.truncate(cutoff);
}

/// Report transfer progress to the event channel
pub async fn report_progress(
    event_tx: &mpsc::Sender<AppEvent>,
    file_name: &str,
    transferred: u64,
    total: u64,
    start_time: Instant,
    is_sending: bool,
) {
    let progress = if total == 0 {
        100.0
    } else {
        (transferred as f32 / total as f32) * 100.0
    };
    let speed = format_transfer_speed(transferred, start_time.elapsed().as_secs_f64());

    let _ = event_tx
        .send(AppEvent::TransferProgress {
            file_name: file_name.to_string(),
            transferred,
            total,
            progress,
            speed,
            is_sending,
        })
        .await;
}
