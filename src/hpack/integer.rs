//! HPACK primitive types: prefix integers and string literals (RFC 7541 Section 5).
//!
//! An integer is packed into the low `N` bits of a first byte. Values that do
//! not fit fill the prefix with ones and continue as a little-endian base-128
//! sequence whose bytes carry a continuation flag in the high bit:
//!
//! ```text
//!   0   1   2   3   4   5   6   7
//! +---+---+---+---+---+---+---+---+
//! | ? | ? | ? | 1   1   1   1   1 |
//! +---+---+---+-------------------+
//! | 1 |    Value-(2^N-1) LSB      |
//! +---+---------------------------+
//!                ...
//! +---+---------------------------+
//! | 0 |    Value-(2^N-1) MSB      |
//! +---+---------------------------+
//! ```

use crate::error::HpackError;

use super::huffman;

/// Flag bit of a string literal's length prefix marking Huffman coding.
pub const HUFFMAN_FLAG: u8 = 0x80;

fn check_prefix(prefix_bits: u8) -> Result<(), HpackError> {
    if prefix_bits == 0 || prefix_bits > 8 {
        return Err(HpackError::InvalidPrefix(prefix_bits));
    }
    Ok(())
}

fn prefix_max(prefix_bits: u8) -> usize {
    (1usize << prefix_bits) - 1
}

/// Encode `n` with an `prefix_bits`-bit prefix.
///
/// ```
/// use h2_wire::hpack::integer;
///
/// assert_eq!(integer::encode(10, 5).unwrap(), [0x0a]);
/// assert_eq!(integer::encode(1337, 5).unwrap(), [0x1f, 0x9a, 0x0a]);
/// ```
pub fn encode(n: usize, prefix_bits: u8) -> Result<Vec<u8>, HpackError> {
    let mut out = Vec::with_capacity(1);
    encode_into(n, prefix_bits, 0, &mut out)?;
    Ok(out)
}

/// Encode `n` into `out`, OR-ing `flags` into the bits above the prefix of
/// the first byte.
pub fn encode_into(
    n: usize,
    prefix_bits: u8,
    flags: u8,
    out: &mut Vec<u8>,
) -> Result<(), HpackError> {
    check_prefix(prefix_bits)?;
    put_int(n, prefix_bits, flags, out);
    Ok(())
}

/// Infallible form for the fixed prefixes used by the codec itself.
pub(crate) fn put_int(n: usize, prefix_bits: u8, flags: u8, out: &mut Vec<u8>) {
    debug_assert!((1..=8).contains(&prefix_bits));
    let max = prefix_max(prefix_bits);
    let flags = flags & !(max as u8);

    if n < max {
        out.push(flags | n as u8);
        return;
    }

    out.push(flags | max as u8);
    let mut rest = n - max;
    while rest >= 0x80 {
        out.push(0x80 | (rest & 0x7f) as u8);
        rest >>= 7;
    }
    out.push(rest as u8);
}

/// Decode an integer with a `prefix_bits`-bit prefix from the start of `buf`.
///
/// Bits above the prefix in the first byte are ignored. Returns the value
/// and the number of bytes consumed.
pub fn decode(buf: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    check_prefix(prefix_bits)?;
    let first = *buf.first().ok_or(HpackError::Truncated)?;
    let max = prefix_max(prefix_bits);

    let mut value = first as usize & max;
    if value < max {
        return Ok((value, 1));
    }

    let mut shift = 0u32;
    for (i, &byte) in buf[1..].iter().enumerate() {
        let chunk = (byte & 0x7f) as usize;
        if shift >= usize::BITS || (chunk << shift) >> shift != chunk {
            return Err(HpackError::IntegerOverflow);
        }
        value = value
            .checked_add(chunk << shift)
            .ok_or(HpackError::IntegerOverflow)?;
        if byte & 0x80 == 0 {
            return Ok((value, i + 2));
        }
        shift += 7;
    }

    Err(HpackError::Truncated)
}

/// Append a string literal: 7-bit length prefix with the Huffman flag,
/// followed by the raw or Huffman-coded octets.
pub fn encode_string(s: &[u8], use_huffman: bool, out: &mut Vec<u8>) {
    if use_huffman {
        let coded = huffman::encode(s);
        put_int(coded.len(), 7, HUFFMAN_FLAG, out);
        out.extend_from_slice(&coded);
    } else {
        put_int(s.len(), 7, 0, out);
        out.extend_from_slice(s);
    }
}

/// Decode a string literal from the start of `buf`. Returns the octets and
/// the number of bytes consumed.
pub fn decode_string(buf: &[u8]) -> Result<(Vec<u8>, usize), HpackError> {
    let first = *buf.first().ok_or(HpackError::Truncated)?;
    let (len, used) = decode(buf, 7)?;
    let end = used.checked_add(len).ok_or(HpackError::IntegerOverflow)?;
    if buf.len() < end {
        return Err(HpackError::Truncated);
    }

    let raw = &buf[used..end];
    let octets = if first & HUFFMAN_FLAG != 0 {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };
    Ok((octets, end))
}
