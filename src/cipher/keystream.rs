//! Block-cipher keystream mode.
//!
//! The 4-byte IV is repeated into a 16-byte buffer which is re-encrypted with
//! AES-256 every 16 bytes and XOR-ed into the payload. The first chunk of a
//! payload is 0x5B0 bytes, every following chunk 0x5B4; each chunk restarts
//! from the raw IV. The transform is its own inverse.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::cipher::iv::Iv;
use crate::error::{Result, ServerError};

/// Fixed key material the client build was compiled with.
pub const USER_KEY: [u8; 32] = [
    0x13, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0xB4, 0x00, 0x00, 0x00,
    0x1B, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x33, 0x00, 0x00, 0x00, 0x52, 0x00, 0x00, 0x00,
];

pub const FIRST_CHUNK: usize = 0x5B0;
pub const NEXT_CHUNK: usize = 0x5B4;

static SCHEDULE: OnceLock<Arc<KeySchedule>> = OnceLock::new();

/// Expanded AES key. Read-only once built and shared by every connection.
pub struct KeySchedule {
    aes: Aes256,
}

impl KeySchedule {
    fn build() -> Self {
        Self {
            aes: Aes256::new(GenericArray::from_slice(&USER_KEY)),
        }
    }

    /// Initialize the process-wide schedule. Safe to call more than once.
    pub fn init() -> Arc<KeySchedule> {
        SCHEDULE
            .get_or_init(|| {
                debug!("Expanding keystream key schedule");
                Arc::new(Self::build())
            })
            .clone()
    }

    /// The process-wide schedule, if [`KeySchedule::init`] has run.
    pub fn global() -> Result<Arc<KeySchedule>> {
        SCHEDULE.get().cloned().ok_or(ServerError::CipherNotInitialized)
    }

    /// Apply the keystream to `data` in place.
    pub fn apply(&self, data: &mut [u8], iv: Iv) {
        let seed = iv.bytes();
        let mut pos = 0;
        let mut chunk = FIRST_CHUNK;

        while pos < data.len() {
            let len = chunk.min(data.len() - pos);
            let mut block = [0u8; 16];
            for quarter in block.chunks_exact_mut(4) {
                quarter.copy_from_slice(&seed);
            }

            for (x, byte) in data[pos..pos + len].iter_mut().enumerate() {
                if x % 16 == 0 {
                    self.aes.encrypt_block(GenericArray::from_mut_slice(&mut block));
                }
                *byte ^= block[x % 16];
            }

            pos += len;
            chunk = NEXT_CHUNK;
        }
    }
}

/// Apply the keystream using the process-wide schedule.
///
/// # Errors
/// Returns `ServerError::CipherNotInitialized` when called before
/// [`KeySchedule::init`].
pub fn transform(data: &mut [u8], iv: Iv) -> Result<()> {
    KeySchedule::global()?.apply(data, iv);
    Ok(())
}
