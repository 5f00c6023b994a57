//! 4-byte obfuscated packet header.
//!
//! ```text
//! [ver_lo ^ iv2] [ver_hi ^ iv3] [len_lo ^ h0] [len_hi ^ h1]
//! ```
//!
//! The version is the sender's version constant; the length covers the
//! payload only.

use crate::cipher::Iv;
use crate::error::{Result, ServerError};

pub const HEADER_LEN: usize = 4;

/// Largest payload a 16-bit header can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Version a server stamps on outbound headers for a given game version.
#[inline]
pub const fn server_send_version(game_version: u16) -> u16 {
    0xFFFF - game_version
}

/// Build a header for a payload of `len` bytes.
pub fn encode(len: usize, iv: Iv, version: u16) -> Result<[u8; HEADER_LEN]> {
    if len == 0 || len > MAX_PAYLOAD_LEN {
        return Err(ServerError::InvalidLength(len));
    }
    let iv = iv.bytes();
    let [ver_lo, ver_hi] = version.to_le_bytes();
    let [len_lo, len_hi] = (len as u16).to_le_bytes();
    let h0 = ver_lo ^ iv[2];
    let h1 = ver_hi ^ iv[3];
    Ok([h0, h1, len_lo ^ h0, len_hi ^ h1])
}

/// Recover `(version, length)` from a header without validating either.
pub fn decode(header: [u8; HEADER_LEN], iv: Iv) -> (u16, usize) {
    let iv = iv.bytes();
    let version = u16::from_le_bytes([header[0] ^ iv[2], header[1] ^ iv[3]]);
    let len = u16::from_le_bytes([header[0] ^ header[2], header[1] ^ header[3]]);
    (version, len as usize)
}

/// Decode and validate a header: version must match and length must be
/// positive.
pub fn decode_checked(header: [u8; HEADER_LEN], iv: Iv, expected_version: u16) -> Result<usize> {
    let (version, len) = decode(header, iv);
    if version != expected_version {
        return Err(ServerError::VersionMismatch {
            expected: expected_version,
            actual: version,
        });
    }
    if len == 0 {
        return Err(ServerError::InvalidLength(len));
    }
    Ok(len)
}
