/// Payload chunk size for reads and writes.
pub const CHUNK_SIZE: usize = 8192;

/// Largest file name accepted on the wire, in bytes.
pub const MAX_NAME_LEN: usize = 1024;

/// Longest name we create on disk after sanitizing.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Fixed width of the size field: room for any 64-bit varint.
pub const SIZE_FRAME_LEN: usize = super::codec::MAX_VARINT_LEN64;
