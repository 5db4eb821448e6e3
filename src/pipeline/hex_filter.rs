//! Hex rendering filter: every byte becomes two lowercase hex digits.

use super::Codec;
use crate::error::{ArdatError, Result};

pub const UNPROCESSED_WINDOW: usize = 1024;
pub const PROCESSED_WINDOW: usize = 2048;

#[derive(Debug, Default)]
pub struct HexCodec;

impl HexCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for HexCodec {
    fn unprocessed_window(&self) -> usize {
        UNPROCESSED_WINDOW
    }

    fn processed_window(&self) -> usize {
        PROCESSED_WINDOW
    }

    fn encode(&mut self, input: &[u8], _last: bool, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(hex::encode(input).as_bytes());
        Ok(())
    }

    fn decode(&mut self, input: &[u8], _last: bool, out: &mut Vec<u8>) -> Result<()> {
        if input.len() % 2 != 0 {
            return Err(ArdatError::corrupted(format!(
                "hex content has an odd number of digits ({})",
                input.len()
            )));
        }
        let start = out.len();
        out.resize(start + input.len() / 2, 0);
        hex::decode_to_slice(input, &mut out[start..])
            .map_err(|e| ArdatError::corrupted(format!("malformed hex content: {}", e)))
    }
}
