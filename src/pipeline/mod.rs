//! Streaming entry filters
//!
//! A filter sits between a raw byte source and its consumer and rewrites
//! the stream on the fly, one bounded window at a time:
//!
//! ```text
//! inner ──fill W_in──▶ codec.encode / codec.decode ──W_out──▶ read(dst)
//! ```
//!
//! Filters are stacked by nesting `FilterReader`s. The pump tells the codec
//! which call is the last one, so a codec can emit (encode) or withhold and
//! verify (decode) a trailer the consumer never sees as data.

pub mod aes_filter;
pub mod cipher;
pub mod hex_filter;

pub use aes_filter::AesCodec;
pub use cipher::{AesKey, BlockMode, CbcMode, CtrMode, IvGenerator, Strategy, BLOCK_SIZE};
pub use hex_filter::HexCodec;

use crate::error::{ArdatError, Result};
use std::io::{self, Read};

/// Direction a filter runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Encode,
    Decode,
}

/// One transformation step over bounded windows.
///
/// `encode`/`decode` receive at most `unprocessed_window()` bytes and must
/// append at most `processed_window()` bytes to `out`. Every call except
/// the last receives a completely filled window.
pub trait Codec {
    fn unprocessed_window(&self) -> usize;

    fn processed_window(&self) -> usize;

    fn encode(&mut self, input: &[u8], last: bool, out: &mut Vec<u8>) -> Result<()>;

    fn decode(&mut self, input: &[u8], last: bool, out: &mut Vec<u8>) -> Result<()>;
}

/// Reader that pumps its inner reader through a codec
pub struct FilterReader<R> {
    inner: R,
    codec: Box<dyn Codec>,
    mode: Mode,
    label: Option<String>,
    read_buf: Vec<u8>,
    lookahead: Option<u8>,
    processed: Vec<u8>,
    drained: usize,
    finished: bool,
    failed: Option<ArdatError>,
}

impl<R: Read> FilterReader<R> {
    pub fn new(inner: R, codec: Box<dyn Codec>, mode: Mode) -> Self {
        let read_buf = vec![0u8; codec.unprocessed_window()];
        let processed = Vec::with_capacity(codec.processed_window());
        Self {
            inner,
            codec,
            mode,
            label: None,
            read_buf,
            lookahead: None,
            processed,
            drained: 0,
            finished: false,
            failed: None,
        }
    }

    /// Name used to prefix corruption errors, usually the entry path
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Fill `read_buf` completely unless inner runs dry.
    /// Returns the fill length and whether inner is exhausted.
    fn fill(&mut self) -> io::Result<(usize, bool)> {
        let window = self.read_buf.len();
        let mut len = 0;
        if let Some(byte) = self.lookahead.take() {
            self.read_buf[0] = byte;
            len = 1;
        }
        while len < window {
            match self.inner.read(&mut self.read_buf[len..]) {
                Ok(0) => return Ok((len, true)),
                Ok(n) => len += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        // Window is full: peek one byte so the codec knows if this is the last call
        let mut peek = [0u8; 1];
        loop {
            match self.inner.read(&mut peek) {
                Ok(0) => return Ok((len, true)),
                Ok(_) => {
                    self.lookahead = Some(peek[0]);
                    return Ok((len, false));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn drain(&mut self, dst: &mut [u8]) -> usize {
        let available = &self.processed[self.drained..];
        let n = available.len().min(dst.len());
        dst[..n].copy_from_slice(&available[..n]);
        self.drained += n;
        n
    }

    fn step(&mut self) -> io::Result<()> {
        let (len, last) = self.fill()?;
        self.processed.clear();
        self.drained = 0;

        let input = &self.read_buf[..len];
        let result = match self.mode {
            Mode::Encode => self.codec.encode(input, last, &mut self.processed),
            Mode::Decode => self.codec.decode(input, last, &mut self.processed),
        };
        if let Err(err) = result {
            let err = match &self.label {
                Some(label) => err.in_entry(label),
                None => err,
            };
            let replay = replay(&err);
            self.failed = Some(err);
            return Err(replay);
        }
        debug_assert!(self.processed.len() <= self.codec.processed_window());

        if last {
            self.finished = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for FilterReader<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        // A failed codec stays failed
        if let Some(err) = &self.failed {
            return Err(replay(err));
        }
        let mut n = self.drain(dst);
        while n < dst.len() && !self.finished {
            self.step()?;
            n += self.drain(&mut dst[n..]);
        }
        Ok(n)
    }
}

fn replay(err: &ArdatError) -> io::Error {
    match err {
        ArdatError::CorruptedArchive(m) => ArdatError::CorruptedArchive(m.clone()).into(),
        ArdatError::NotSupported(m) => ArdatError::NotSupported(m.clone()).into(),
        ArdatError::Usage(m) => ArdatError::Usage(m.clone()).into(),
        ArdatError::Io(inner) => io::Error::new(inner.kind(), inner.to_string()),
        ArdatError::Json(inner) => io::Error::new(io::ErrorKind::InvalidData, inner.to_string()),
    }
}

/// Run `codec` over a whole buffer in one direction
pub fn apply(codec: Box<dyn Codec>, mode: Mode, data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    FilterReader::new(data, codec, mode).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Doubles every byte and appends a one-byte length trailer on encode
    struct Doubler {
        seen: usize,
    }

    impl Codec for Doubler {
        fn unprocessed_window(&self) -> usize {
            4
        }

        fn processed_window(&self) -> usize {
            9
        }

        fn encode(&mut self, input: &[u8], last: bool, out: &mut Vec<u8>) -> Result<()> {
            for &b in input {
                out.extend_from_slice(&[b, b]);
            }
            self.seen += input.len();
            if last {
                out.push(self.seen as u8);
            }
            Ok(())
        }

        fn decode(&mut self, _input: &[u8], _last: bool, _out: &mut Vec<u8>) -> Result<()> {
            Err(ArdatError::corrupted("decode not wired"))
        }
    }

    /// Reader that hands out one byte per call
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.split_first() {
                Some((first, rest)) if !buf.is_empty() => {
                    buf[0] = *first;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_trailer_emitted_once_at_end() {
        let out = apply(Box::new(Doubler { seen: 0 }), Mode::Encode, b"abcdefgh").unwrap();
        assert_eq!(out, b"aabbccddeeffgghh\x08");
    }

    #[test]
    fn test_final_call_happens_for_empty_input() {
        let out = apply(Box::new(Doubler { seen: 0 }), Mode::Encode, b"").unwrap();
        assert_eq!(out, vec![0u8]);
    }

    #[test]
    fn test_short_reads_still_fill_windows() {
        let mut reader = FilterReader::new(
            Trickle(b"abcde"),
            Box::new(Doubler { seen: 0 }),
            Mode::Encode,
        );
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"aabbccddee\x05");
    }

    #[test]
    fn test_small_destination_buffers() {
        let mut reader = FilterReader::new(
            &b"xyz"[..],
            Box::new(Doubler { seen: 0 }),
            Mode::Encode,
        );
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte).unwrap() {
                0 => break,
                _ => out.push(byte[0]),
            }
        }
        assert_eq!(out, b"xxyyzz\x03");
    }

    #[test]
    fn test_codec_errors_carry_label() {
        let mut reader = FilterReader::new(
            &b"data"[..],
            Box::new(Doubler { seen: 0 }),
            Mode::Decode,
        )
        .with_label("root/file");
        let mut out = Vec::new();
        let err = ArdatError::from(reader.read_to_end(&mut out).unwrap_err());
        assert_eq!(
            err.to_string(),
            "Corrupted archive: root/file: decode not wired"
        );
    }

    #[test]
    fn test_codec_error_repeats_on_later_reads() {
        let mut reader = FilterReader::new(
            &b"data"[..],
            Box::new(Doubler { seen: 0 }),
            Mode::Decode,
        )
        .with_label("root/file");
        let mut buf = [0u8; 16];
        let first = reader.read(&mut buf).unwrap_err();
        let second = reader.read(&mut buf).unwrap_err();
        assert_eq!(first.kind(), io::ErrorKind::InvalidData);
        assert_eq!(second.kind(), io::ErrorKind::InvalidData);
        assert_eq!(second.to_string(), first.to_string());
        assert!(ArdatError::from(second).is_corrupted());
    }
}
