//! Bounded read-only views over a shared seekable source.
//!
//! Several windows may sit on one file handle. The handle is reference
//! counted by the windows themselves: it is dropped when the last window
//! over it closes. Every read repositions the shared cursor first, so
//! interleaved reads on sibling windows are fine as long as they happen
//! on one thread.

use crate::error::{ArdatError, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

/// Anything a window can sit on
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

struct SharedSource {
    source: Option<Box<dyn ReadSeek>>,
    len: u64,
    open_windows: usize,
}

impl SharedSource {
    fn new(mut source: Box<dyn ReadSeek>) -> Result<Self> {
        let len = source.seek(SeekFrom::End(0))?;
        Ok(Self {
            source: Some(source),
            len,
            open_windows: 0,
        })
    }
}

/// A sub-range `[offset, offset + size)` of a shared source with its own cursor.
pub struct ByteWindow {
    shared: Rc<RefCell<SharedSource>>,
    offset: u64,
    size: u64,
    position: u64,
    closed: bool,
}

impl ByteWindow {
    fn attach(shared: Rc<RefCell<SharedSource>>, offset: u64, size: u64) -> Result<Self> {
        check_range(shared.borrow().len, offset, size)?;
        shared.borrow_mut().open_windows += 1;
        Ok(Self {
            shared,
            offset,
            size,
            position: 0,
            closed: false,
        })
    }

    /// Window over the whole of `source`
    pub fn from_source<S: Read + Seek + 'static>(source: S) -> Result<Self> {
        let shared = SharedSource::new(Box::new(source))?;
        let len = shared.len;
        Self::attach(Rc::new(RefCell::new(shared)), 0, len)
    }

    /// Window over an in-memory buffer
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        Self::from_source(Cursor::new(bytes.into()))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the local cursor. Out-of-range values are clamped to `[0, size]`.
    pub fn set_position(&mut self, position: u64) {
        self.position = position.min(self.size);
    }

    /// Length of the underlying source
    pub fn source_len(&self) -> u64 {
        self.shared.borrow().len
    }

    /// Re-aim the window at another range of the same source.
    /// The cursor is kept but clamped to the new size.
    pub fn set_range(&mut self, offset: u64, size: u64) -> Result<()> {
        check_range(self.source_len(), offset, size)?;
        self.offset = offset;
        self.size = size;
        self.position = self.position.min(size);
        Ok(())
    }

    /// A fresh window over the same range and source, cursor at zero
    pub fn clone_view(&self) -> Result<Self> {
        if self.closed {
            return Err(ArdatError::usage("cannot clone a closed window"));
        }
        Self::attach(Rc::clone(&self.shared), self.offset, self.size)
    }

    /// Number of live windows sharing this window's source
    pub fn open_windows(&self) -> usize {
        self.shared.borrow().open_windows
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn truncate(&mut self, _len: u64) -> Result<()> {
        Err(ArdatError::NotSupported("byte windows are read-only".into()))
    }

    /// Release this window. The shared source is dropped once no window remains.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut shared = self.shared.borrow_mut();
        shared.open_windows = shared.open_windows.saturating_sub(1);
        if shared.open_windows == 0 {
            shared.source = None;
        }
    }
}

fn check_range(len: u64, offset: u64, size: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= len => Ok(()),
        _ => Err(ArdatError::usage(format!(
            "window [{}, +{}) exceeds source of {} bytes",
            offset, size, len
        ))),
    }
}

impl Read for ByteWindow {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "read on a closed window"));
        }
        let remaining = self.size - self.position;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let mut shared = self.shared.borrow_mut();
        let source = shared
            .source
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "window source is closed"))?;
        source.seek(SeekFrom::Start(self.offset + self.position))?;
        let n = source.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "source ended inside the window",
            ));
        }
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for ByteWindow {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => i128::from(p),
            SeekFrom::End(d) => i128::from(self.size) + i128::from(d),
            SeekFrom::Current(d) => i128::from(self.position) + i128::from(d),
        };
        self.position = target.clamp(0, i128::from(self.size)) as u64;
        Ok(self.position)
    }
}

impl Write for ByteWindow {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(ArdatError::NotSupported("byte windows are read-only".into()).into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ByteWindow {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ByteWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteWindow")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("position", &self.position)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Hands out windows over files, sharing one handle per path while any
/// window on it is still open.
#[derive(Default)]
pub struct WindowFactory {
    sources: HashMap<PathBuf, Weak<RefCell<SharedSource>>>,
}

impl WindowFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, path: &Path, offset: u64, size: u64) -> Result<ByteWindow> {
        let live = self
            .sources
            .get(path)
            .and_then(Weak::upgrade)
            .filter(|shared| shared.borrow().source.is_some());

        let shared = match live {
            Some(shared) => shared,
            None => {
                let file = File::open(path)?;
                let shared = Rc::new(RefCell::new(SharedSource::new(Box::new(file))?));
                self.sources.insert(path.to_path_buf(), Rc::downgrade(&shared));
                shared
            }
        };
        ByteWindow::attach(shared, offset, size)
    }

    /// Whether a handle on `path` is currently held open
    pub fn is_open(&self, path: &Path) -> bool {
        self.sources
            .get(path)
            .and_then(Weak::upgrade)
            .map_or(false, |shared| shared.borrow().source.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn read_all(window: &mut ByteWindow) -> Vec<u8> {
        let mut out = Vec::new();
        window.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_reads_only_the_range() {
        let base = ByteWindow::from_bytes(b"0123456789".to_vec()).unwrap();
        let mut window = base.clone_view().unwrap();
        window.set_range(3, 4).unwrap();

        assert_eq!(read_all(&mut window), b"3456");
        let mut buf = [0u8; 4];
        assert_eq!(window.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek_is_clamped() {
        let mut window = ByteWindow::from_bytes(b"abcdef".to_vec()).unwrap();
        assert_eq!(window.seek(SeekFrom::Start(100)).unwrap(), 6);
        assert_eq!(window.seek(SeekFrom::Current(-100)).unwrap(), 0);
        assert_eq!(window.seek(SeekFrom::End(-2)).unwrap(), 4);
        assert_eq!(read_all(&mut window), b"ef");

        window.set_position(42);
        assert_eq!(window.position(), 6);
    }

    #[test]
    fn test_set_range_clamps_position() {
        let mut window = ByteWindow::from_bytes(vec![7u8; 32]).unwrap();
        window.set_position(20);
        window.set_range(0, 8).unwrap();
        assert_eq!(window.position(), 8);
        assert!(window.set_range(30, 8).is_err());
    }

    #[test]
    fn test_sibling_windows_have_independent_cursors() {
        let first = ByteWindow::from_bytes(b"hello world".to_vec()).unwrap();
        let mut left = first.clone_view().unwrap();
        let mut right = first.clone_view().unwrap();
        left.set_range(0, 5).unwrap();
        right.set_range(6, 5).unwrap();

        let mut a = [0u8; 2];
        let mut b = [0u8; 2];
        left.read_exact(&mut a).unwrap();
        right.read_exact(&mut b).unwrap();
        assert_eq!(&a, b"he");
        assert_eq!(&b, b"wo");
        assert_eq!(read_all(&mut left), b"llo");
        assert_eq!(read_all(&mut right), b"rld");
    }

    #[test]
    fn test_writes_are_rejected() {
        let mut window = ByteWindow::from_bytes(b"ro".to_vec()).unwrap();
        let err = window.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(matches!(window.truncate(0), Err(ArdatError::NotSupported(_))));
    }

    #[test]
    fn test_last_close_releases_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"shared handle").unwrap();

        let mut factory = WindowFactory::new();
        let mut a = factory.open(&path, 0, 6).unwrap();
        let mut b = factory.open(&path, 7, 6).unwrap();
        assert_eq!(a.open_windows(), 2);
        assert_eq!(read_all(&mut b), b"handle");

        a.close();
        assert!(factory.is_open(&path));
        assert_eq!(b.open_windows(), 1);

        drop(b);
        assert!(!factory.is_open(&path));

        // A new request reopens the file
        let mut c = factory.open(&path, 0, 6).unwrap();
        assert_eq!(read_all(&mut c), b"shared");
    }

    #[test]
    fn test_closed_window_refuses_reads() {
        let mut window = ByteWindow::from_bytes(b"abc".to_vec()).unwrap();
        window.close();
        let mut buf = [0u8; 1];
        assert!(window.read(&mut buf).is_err());
        assert!(window.clone_view().is_err());
    }

    proptest! {
        #[test]
        fn prop_window_matches_slice(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            a in 0usize..512,
            b in 0usize..512,
        ) {
            let start = a.min(data.len());
            let end = start + b.min(data.len() - start);
            let base = ByteWindow::from_bytes(data.clone()).unwrap();
            let mut window = base.clone_view().unwrap();
            window.set_range(start as u64, (end - start) as u64).unwrap();
            prop_assert_eq!(read_all(&mut window), data[start..end].to_vec());
        }
    }
}
