//! AES block modes
//!
//! The raw primitive is the `aes` crate's one-block ECB transform. CBC and
//! CTR are chained on top here so the state can carry across calls: one
//! instance encrypts (or decrypts) a whole entry, chunk by chunk.

use crate::error::{ArdatError, Result};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use std::collections::HashSet;

pub const BLOCK_SIZE: usize = 16;
pub const CBC_IV_LEN: usize = 16;
pub const CTR_NONCE_LEN: usize = 8;

/// Symmetric key for the AES filter (128, 192 or 256 bits)
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey {
    bytes: Vec<u8>,
}

impl AesKey {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self {
                bytes: bytes.to_vec(),
            }),
            n => Err(ArdatError::usage(format!(
                "AES key must be 16, 24 or 32 bytes, got {}",
                n
            ))),
        }
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| ArdatError::usage(format!("key is not valid hex: {}", e)))?;
        Self::new(&bytes)
    }

    pub fn bits(&self) -> usize {
        self.bytes.len() * 8
    }

    fn block_cipher(&self) -> Result<AesBlock> {
        let invalid = |_| ArdatError::usage("invalid AES key length");
        Ok(match self.bytes.len() {
            16 => AesBlock::Aes128(Aes128::new_from_slice(&self.bytes).map_err(invalid)?),
            24 => AesBlock::Aes192(Aes192::new_from_slice(&self.bytes).map_err(invalid)?),
            _ => AesBlock::Aes256(Aes256::new_from_slice(&self.bytes).map_err(invalid)?),
        })
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AesKey(<{} bits>)", self.bits())
    }
}

impl Drop for AesKey {
    fn drop(&mut self) {
        self.bytes.iter_mut().for_each(|b| *b = 0);
    }
}

enum AesBlock {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesBlock {
    fn encrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes192(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// Stateful block mode working in place on block-aligned buffers
pub trait BlockMode {
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn encrypt(&mut self, buf: &mut [u8]) -> Result<()>;

    fn decrypt(&mut self, buf: &mut [u8]) -> Result<()>;
}

fn check_aligned(buf: &[u8]) -> Result<()> {
    if buf.len() % BLOCK_SIZE != 0 {
        return Err(ArdatError::corrupted(format!(
            "{} bytes is not a whole number of cipher blocks",
            buf.len()
        )));
    }
    Ok(())
}

pub struct CbcMode {
    cipher: AesBlock,
    prev: [u8; BLOCK_SIZE],
}

impl CbcMode {
    pub fn new(key: &AesKey, iv: &[u8]) -> Result<Self> {
        let prev: [u8; CBC_IV_LEN] = iv.try_into().map_err(|_| {
            ArdatError::corrupted(format!("CBC IV must be {} bytes, got {}", CBC_IV_LEN, iv.len()))
        })?;
        Ok(Self {
            cipher: key.block_cipher()?,
            prev,
        })
    }
}

impl BlockMode for CbcMode {
    fn encrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        check_aligned(buf)?;
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            block.iter_mut().zip(self.prev.iter()).for_each(|(b, p)| *b ^= p);
            self.cipher.encrypt_block(block);
            self.prev.copy_from_slice(block);
        }
        Ok(())
    }

    fn decrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        check_aligned(buf)?;
        let mut saved = [0u8; BLOCK_SIZE];
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            saved.copy_from_slice(block);
            self.cipher.decrypt_block(block);
            block.iter_mut().zip(self.prev.iter()).for_each(|(b, p)| *b ^= p);
            self.prev = saved;
        }
        Ok(())
    }
}

/// CTR over an 8-byte nonce followed by a 64-bit big-endian block counter
pub struct CtrMode {
    cipher: AesBlock,
    nonce: [u8; CTR_NONCE_LEN],
    counter: u64,
}

impl CtrMode {
    pub fn new(key: &AesKey, nonce: &[u8]) -> Result<Self> {
        let nonce: [u8; CTR_NONCE_LEN] = nonce.try_into().map_err(|_| {
            ArdatError::corrupted(format!(
                "CTR nonce must be {} bytes, got {}",
                CTR_NONCE_LEN,
                nonce.len()
            ))
        })?;
        Ok(Self {
            cipher: key.block_cipher()?,
            nonce,
            counter: 0,
        })
    }

    fn apply(&mut self, buf: &mut [u8]) -> Result<()> {
        check_aligned(buf)?;
        let mut keystream = [0u8; BLOCK_SIZE];
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            keystream[..CTR_NONCE_LEN].copy_from_slice(&self.nonce);
            keystream[CTR_NONCE_LEN..].copy_from_slice(&self.counter.to_be_bytes());
            self.cipher.encrypt_block(&mut keystream);
            block.iter_mut().zip(keystream.iter()).for_each(|(b, k)| *b ^= k);
            self.counter = self.counter.wrapping_add(1);
        }
        Ok(())
    }
}

impl BlockMode for CtrMode {
    fn encrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        self.apply(buf)
    }

    fn decrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        self.apply(buf)
    }
}

/// Block mode selection, recorded in headers under `strategy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Cbc,
    Ctr,
}

impl Strategy {
    /// Value of the `strategy` header property
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Cbc => "crypto.AESCBCStrategy",
            Self::Ctr => "crypto.AESCTRStrategy",
        }
    }

    /// Header property holding the IV
    pub fn iv_key(self) -> &'static str {
        match self {
            Self::Cbc => "iv128",
            Self::Ctr => "iv64",
        }
    }

    pub fn iv_len(self) -> usize {
        match self {
            Self::Cbc => CBC_IV_LEN,
            Self::Ctr => CTR_NONCE_LEN,
        }
    }

    pub fn instantiate(self, key: &AesKey, iv: &[u8]) -> Result<Box<dyn BlockMode>> {
        Ok(match self {
            Self::Cbc => Box::new(CbcMode::new(key, iv)?),
            Self::Ctr => Box::new(CtrMode::new(key, iv)?),
        })
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cbc => write!(f, "cbc"),
            Self::Ctr => write!(f, "ctr"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = ArdatError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cbc" | "crypto.aescbcstrategy" => Ok(Self::Cbc),
            "ctr" | "crypto.aesctrstrategy" => Ok(Self::Ctr),
            _ => Err(ArdatError::usage(format!("unknown AES strategy: {}", s))),
        }
    }
}

/// Draws IVs from a random source, never handing out the same value twice.
pub struct IvGenerator {
    rng: Box<dyn RngCore>,
    issued128: HashSet<[u8; CBC_IV_LEN]>,
    issued64: HashSet<[u8; CTR_NONCE_LEN]>,
}

impl IvGenerator {
    /// Backed by the operating system CSPRNG
    pub fn new() -> Self {
        Self::with_rng(Box::new(OsRng))
    }

    /// Reproducible sequence, for tests and fixtures
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(Box::new(StdRng::seed_from_u64(seed)))
    }

    pub fn with_rng(rng: Box<dyn RngCore>) -> Self {
        Self {
            rng,
            issued128: HashSet::new(),
            issued64: HashSet::new(),
        }
    }

    pub fn iv128(&mut self) -> [u8; CBC_IV_LEN] {
        loop {
            let mut iv = [0u8; CBC_IV_LEN];
            self.rng.fill_bytes(&mut iv);
            if self.issued128.insert(iv) {
                return iv;
            }
        }
    }

    pub fn iv64(&mut self) -> [u8; CTR_NONCE_LEN] {
        loop {
            let mut iv = [0u8; CTR_NONCE_LEN];
            self.rng.fill_bytes(&mut iv);
            if self.issued64.insert(iv) {
                return iv;
            }
        }
    }

    /// Fresh IV sized for `strategy`
    pub fn generate(&mut self, strategy: Strategy) -> Vec<u8> {
        match strategy {
            Strategy::Cbc => self.iv128().to_vec(),
            Strategy::Ctr => self.iv64().to_vec(),
        }
    }
}

impl Default for IvGenerator {
    fn default() -> Self {
        Self::new()
    }
}
