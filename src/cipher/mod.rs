//! # Packet Ciphers
//!
//! Two transforms run over every payload byte after the 4-byte header:
//!
//! - **Keystream** ([`keystream`]): AES-256 re-encrypting the expanded IV,
//!   XOR-ed into the data. Self-inverse.
//! - **Round** ([`round`]): substitution/rotation cipher with distinct encode
//!   and decode passes.
//!
//! Sending applies round-encrypt then keystream; receiving applies keystream
//! then round-decrypt. The IV for each direction ([`iv::Iv`]) is advanced after
//! every packet by the framing layer.

pub mod iv;
pub mod keystream;
pub mod round;

pub use iv::Iv;
pub use keystream::KeySchedule;

/// Encrypt a payload in place for sending.
pub fn seal(schedule: &KeySchedule, data: &mut [u8], iv: Iv) {
    round::encrypt(data);
    schedule.apply(data, iv);
}

/// Decrypt a received payload in place.
pub fn open(schedule: &KeySchedule, data: &mut [u8], iv: Iv) {
    schedule.apply(data, iv);
    round::decrypt(data);
}
