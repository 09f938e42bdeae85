//! Modified UTF-8, the text encoding used for strings inside object streams.
//!
//! It differs from standard UTF-8 in three ways:
//!
//! - U+0000 is written as the two-byte sequence `C0 80`, so encoded text
//!   never contains a zero byte.
//! - Only one, two and three byte sequences exist.
//! - Code points above U+FFFF are written as a UTF-16 surrogate pair with
//!   each surrogate encoded separately as a three byte sequence.
//!
//! Decoding accepts a bare zero byte (older writers produced it) but rejects
//! unpaired surrogates, since they cannot be represented in a Rust `String`.

use crate::BufferError;

#[inline]
fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007f => 1,
        0x0000 | 0x0080..=0x07ff => 2,
        _ => 3,
    }
}

/// Number of bytes `s` occupies once encoded.
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16().map(unit_len).sum()
}

/// Appends the encoding of `s` to `out`.
pub fn encode_into(s: &str, out: &mut Vec<u8>) {
    out.reserve(encoded_len(s));
    for unit in s.encode_utf16() {
        match unit_len(unit) {
            1 => out.push(unit as u8),
            2 => {
                out.push(0xc0 | ((unit >> 6) & 0x1f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) & 0x0f) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
}

/// Encodes `s` into a new vector.
///
/// # Example
///
/// ```
/// use objstream_buffers::mutf8;
///
/// assert_eq!(mutf8::encode("a\u{0}"), vec![b'a', 0xc0, 0x80]);
/// assert_eq!(mutf8::encode("\u{1F600}").len(), 6);
/// ```
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(s, &mut out);
    out
}

#[inline]
fn continuation(bytes: &[u8], at: usize) -> Result<u16, BufferError> {
    match bytes.get(at) {
        Some(&b) if b & 0xc0 == 0x80 => Ok((b & 0x3f) as u16),
        _ => Err(BufferError::InvalidUtf(at)),
    }
}

/// Decodes modified UTF-8 bytes into a string.
///
/// The error carries the byte offset of the first malformed sequence.
pub fn decode(bytes: &[u8]) -> Result<String, BufferError> {
    let mut out = String::with_capacity(bytes.len());
    // High surrogate waiting for its partner, with the offset it started at.
    let mut pending: Option<(u16, usize)> = None;
    let mut x = 0;
    while x < bytes.len() {
        let at = x;
        let b = bytes[x];
        let unit = match b >> 4 {
            0..=7 => {
                x += 1;
                b as u16
            }
            12 | 13 => {
                let unit = (((b & 0x1f) as u16) << 6) | continuation(bytes, x + 1)?;
                x += 2;
                unit
            }
            14 => {
                let unit = (((b & 0x0f) as u16) << 12)
                    | (continuation(bytes, x + 1)? << 6)
                    | continuation(bytes, x + 2)?;
                x += 3;
                unit
            }
            _ => return Err(BufferError::InvalidUtf(at)),
        };
        match unit {
            0xd800..=0xdbff => {
                if let Some((_, start)) = pending {
                    return Err(BufferError::InvalidUtf(start));
                }
                pending = Some((unit, at));
            }
            0xdc00..=0xdfff => {
                let (high, _) = pending.take().ok_or(BufferError::InvalidUtf(at))?;
                let code =
                    0x10000 + (((high - 0xd800) as u32) << 10) + (unit - 0xdc00) as u32;
                out.push(char::from_u32(code).ok_or(BufferError::InvalidUtf(at))?);
            }
            _ => {
                if let Some((_, start)) = pending {
                    return Err(BufferError::InvalidUtf(start));
                }
                out.push(char::from_u32(unit as u32).ok_or(BufferError::InvalidUtf(at))?);
            }
        }
    }
    match pending {
        Some((_, start)) => Err(BufferError::InvalidUtf(start)),
        None => Ok(out),
    }
}
