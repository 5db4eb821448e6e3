//! AES entry filter
//!
//! Wire layout of an encoded entry:
//!
//! ```text
//! E(P_0) E(P_1) ... E(P_n || pad) | SHA-256(P_0 .. P_n || pad)
//! ```
//!
//! Padding is PKCS#7 and always present (a whole block when the plaintext
//! is already aligned). The digest trailer is withheld from the decoded
//! stream and checked once the inner source is drained.

use super::cipher::{BlockMode, BLOCK_SIZE};
use super::Codec;
use crate::error::{ArdatError, Result};
use sha2::{Digest, Sha256};

pub const TRAILER_LEN: usize = 32;

/// One plaintext block plus room for a trailer in flight
pub const UNPROCESSED_WINDOW: usize = BLOCK_SIZE + TRAILER_LEN;

/// Input window plus a padding block and the trailer
pub const PROCESSED_WINDOW: usize = UNPROCESSED_WINDOW + BLOCK_SIZE + TRAILER_LEN;

pub struct AesCodec {
    mode: Box<dyn BlockMode>,
    digest: Sha256,
    ring: Vec<u8>,
}

impl AesCodec {
    pub fn new(mode: Box<dyn BlockMode>) -> Self {
        Self {
            mode,
            digest: Sha256::new(),
            ring: Vec::with_capacity(TRAILER_LEN),
        }
    }
}

impl Codec for AesCodec {
    fn unprocessed_window(&self) -> usize {
        UNPROCESSED_WINDOW
    }

    fn processed_window(&self) -> usize {
        PROCESSED_WINDOW
    }

    fn encode(&mut self, input: &[u8], last: bool, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        out.extend_from_slice(input);
        if last {
            let pad = BLOCK_SIZE - input.len() % BLOCK_SIZE;
            out.resize(out.len() + pad, pad as u8);
        } else if input.len() % BLOCK_SIZE != 0 {
            return Err(ArdatError::usage(format!(
                "intermediate AES chunk of {} bytes is not block aligned",
                input.len()
            )));
        }

        self.digest.update(&out[start..]);
        self.mode.encrypt(&mut out[start..])?;

        if last {
            out.extend_from_slice(&self.digest.finalize_reset());
        }
        Ok(())
    }

    fn decode(&mut self, input: &[u8], last: bool, out: &mut Vec<u8>) -> Result<()> {
        let mut combined = std::mem::take(&mut self.ring);
        combined.extend_from_slice(input);

        if combined.len() < TRAILER_LEN {
            if last {
                return Err(ArdatError::corrupted(format!(
                    "encrypted content of {} bytes is shorter than its digest",
                    combined.len()
                )));
            }
            self.ring = combined;
            return Ok(());
        }

        let split = combined.len() - TRAILER_LEN;
        self.ring = combined.split_off(split);
        if combined.len() % BLOCK_SIZE != 0 {
            return Err(ArdatError::corrupted(format!(
                "encrypted content is not a whole number of blocks ({} bytes pending)",
                combined.len()
            )));
        }

        self.mode.decrypt(&mut combined)?;
        self.digest.update(&combined);

        if !last {
            out.extend_from_slice(&combined);
            return Ok(());
        }

        let actual = self.digest.finalize_reset();
        if !constant_time_compare(actual.as_slice(), &self.ring) {
            return Err(ArdatError::corrupted("content hash mismatch"));
        }

        let pad = match combined.last() {
            Some(&b) => b as usize,
            None => {
                return Err(ArdatError::corrupted("encrypted content has no padding block"));
            }
        };
        if pad == 0 || pad > BLOCK_SIZE || pad > combined.len() {
            return Err(ArdatError::corrupted(format!(
                "padding byte {} out of range",
                pad
            )));
        }
        combined.truncate(combined.len() - pad);
        out.extend_from_slice(&combined);
        Ok(())
    }
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
