//! File transfer over an established secure channel.
//!
//! This module provides:
//! - Header framing (name and size) and the Go-compatible size varint
//! - Chunked sending with progress events
//! - Receiving into a fresh, never-overwriting file

pub mod codec;
pub mod constants;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod utils;

use std::path::PathBuf;

use crate::{FileMetadata, Role};

// Re-export public API
pub use receiver::receive_file;
pub use sender::send_file;
pub use utils::{create_new_file_on_disk, sanitize_file_name};

/// Byte accounting for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSession {
    pub role: Role,
    pub transferred: u64,
    pub total: u64,
}

impl TransferSession {
    pub fn new(role: Role, total: u64) -> Self {
        Self {
            role,
            transferred: 0,
            total,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.transferred)
    }

    pub fn is_complete(&self) -> bool {
        self.transferred == self.total
    }
}

/// What the receiver ends up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Name and size as announced by the sender, before sanitizing.
    pub metadata: FileMetadata,
    pub saved_path: PathBuf,
    pub session: TransferSession,
}
