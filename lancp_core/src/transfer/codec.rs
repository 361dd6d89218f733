//! Signed varints in the layout of Go's `encoding/binary` (`PutVarint` /
//! `Varint`): zigzag mapping, then little-endian base-128 groups with the
//! high bit as continuation flag.

use thiserror::Error;

/// Longest possible encoding of a 64-bit value.
pub const MAX_VARINT_LEN64: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarintError {
    #[error("buffer ended before the varint did")]
    BufferTooSmall,
    #[error("varint overflows a 64-bit integer")]
    Overflow,
}

fn zigzag(x: i64) -> u64 {
    let ux = (x as u64) << 1;
    if x < 0 { !ux } else { ux }
}

fn unzigzag(ux: u64) -> i64 {
    let x = (ux >> 1) as i64;
    if ux & 1 != 0 { !x } else { x }
}

/// Encode `x` into the front of `buf` and return how many bytes were used.
///
/// `buf` must hold at least [`MAX_VARINT_LEN64`] bytes.
pub fn put_varint(buf: &mut [u8], x: i64) -> Result<usize, VarintError> {
    let mut ux = zigzag(x);
    let mut i = 0;
    while ux >= 0x80 {
        *buf.get_mut(i).ok_or(VarintError::BufferTooSmall)? = (ux as u8) | 0x80;
        ux >>= 7;
        i += 1;
    }
    *buf.get_mut(i).ok_or(VarintError::BufferTooSmall)? = ux as u8;
    Ok(i + 1)
}

/// Encode `x` left-aligned in a zero-padded buffer of the maximum length.
pub fn encode_varint(x: i64) -> [u8; MAX_VARINT_LEN64] {
    let mut buf = [0u8; MAX_VARINT_LEN64];
    // Cannot fail: the buffer is as long as the longest encoding.
    let _ = put_varint(&mut buf, x);
    buf
}

/// Decode a varint from the front of `buf`, returning the value and the
/// number of bytes consumed. Trailing bytes are ignored.
pub fn decode_varint(buf: &[u8]) -> Result<(i64, usize), VarintError> {
    let mut ux: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN64 {
            return Err(VarintError::Overflow);
        }
        if b < 0x80 {
            if i == MAX_VARINT_LEN64 - 1 && b > 1 {
                return Err(VarintError::Overflow);
            }
            return Ok((unzigzag(ux | (b as u64) << shift), i + 1));
        }
        ux |= ((b & 0x7f) as u64) << shift;
        shift += 7;
    }
    Err(VarintError::BufferTooSmall)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_go_encoding() {
        let cases: &[(i64, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x02]),
            (-1, &[0x01]),
            (63, &[0x7e]),
            (-64, &[0x7f]),
            (64, &[0x80, 0x01]),
            (20000, &[0xc0, 0xb8, 0x02]),
        ];
        for (value, bytes) in cases {
            let buf = encode_varint(*value);
            assert_eq!(&buf[..bytes.len()], *bytes, "encoding of {}", value);
            assert!(buf[bytes.len()..].iter().all(|&b| b == 0));
            assert_eq!(decode_varint(&buf).unwrap(), (*value, bytes.len()));
        }
    }

    #[test]
    fn test_extremes_use_ten_bytes() {
        let max = encode_varint(i64::MAX);
        assert_eq!(max[0], 0xfe);
        assert_eq!(max[9], 0x01);
        assert_eq!(decode_varint(&max).unwrap(), (i64::MAX, 10));

        let min = encode_varint(i64::MIN);
        assert!(min[..9].iter().all(|&b| b == 0xff));
        assert_eq!(decode_varint(&min).unwrap(), (i64::MIN, 10));
    }

    #[test]
    fn test_empty_or_truncated_buffer() {
        assert_eq!(decode_varint(&[]), Err(VarintError::BufferTooSmall));
        assert_eq!(decode_varint(&[0x80, 0x80]), Err(VarintError::BufferTooSmall));

        let mut short = [0u8; 2];
        assert_eq!(put_varint(&mut short, 1 << 20), Err(VarintError::BufferTooSmall));
    }

    #[test]
    fn test_overflow() {
        let mut too_big = [0xffu8; 10];
        too_big[9] = 0x02;
        assert_eq!(decode_varint(&too_big), Err(VarintError::Overflow));

        let endless = [0xffu8; 11];
        assert_eq!(decode_varint(&endless), Err(VarintError::Overflow));
    }
}
