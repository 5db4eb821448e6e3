use crate::error::{ArdatError, Result};
use crate::header::{size_line, ArchiveMetadata, EntryHeader};
use crate::tree::{NodeId, Tree, TreeWriter};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Content is streamed in chunks of this size
pub const COPY_BUFFER_LEN: usize = 8 * 1024;

/// Writes a tree into a new archive file.
///
/// Each entry's size is only known once its filters have drained, so the
/// `size` line goes out as a placeholder and is patched afterwards.
pub struct ArchiveWriter {
    path: PathBuf,
    out: BufWriter<File>,
    position: u64,
    buffer: Vec<u8>,
}

impl ArchiveWriter {
    /// Create `path` (which must not exist) with this host's metadata
    pub fn create(path: &Path) -> Result<Self> {
        Self::with_metadata(path, &ArchiveMetadata::for_host())
    }

    pub fn with_metadata(path: &Path, metadata: &ArchiveMetadata) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    ArdatError::usage(format!("{} already exists", path.display()))
                }
                _ => ArdatError::from(e),
            })?;

        let mut out = BufWriter::new(file);
        let text = metadata.serialize();
        out.write_all(text.as_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            out,
            position: text.len() as u64,
            buffer: vec![0u8; COPY_BUFFER_LEN],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Flush everything to disk and return the archive length
    pub fn finish(mut self) -> Result<u64> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(self.position)
    }
}

impl TreeWriter for ArchiveWriter {
    fn write_node(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        let filepath = tree.path(id);
        let header =
            EntryHeader::from_properties(&tree.properties(id), filepath.as_str(), tree.children(id).len())?;

        let prefix = header.prefix();
        self.out.write_all(prefix.as_bytes())?;
        let size_at = self.position + prefix.len() as u64;
        let placeholder = size_line(0);
        self.out.write_all(placeholder.as_bytes())?;
        self.out.write_all(b"\n")?;
        let content_at = size_at + placeholder.len() as u64 + 1;

        let mut content = tree.open_content(id)?;
        let mut written = 0u64;
        loop {
            let n = match content.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArdatError::from(e).in_entry(&filepath)),
            };
            self.out.write_all(&self.buffer[..n])?;
            written += n as u64;
        }
        drop(content);

        let end = content_at + written;
        self.out.seek(SeekFrom::Start(size_at))?;
        self.out.write_all(size_line(written).as_bytes())?;
        self.out.seek(SeekFrom::Start(end))?;
        self.position = end;

        debug!("wrote {} ({} bytes)", header.filepath, written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Property, ACCESS_TIME, CREATE_TIME, MODIFY_TIME};
    use crate::tree::{Content, FileNode};
    use tempfile::tempdir;

    fn times() -> Vec<Property> {
        vec![
            Property::new(CREATE_TIME, "1"),
            Property::new(MODIFY_TIME, "1"),
            Property::new(ACCESS_TIME, "1"),
        ]
    }

    #[test]
    fn test_single_file_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("single.ardat");

        let mut tree = Tree::new();
        tree.add_file(None, "f", times(), FileNode::plain(Content::Bytes(b"qwerty".to_vec())))
            .unwrap();

        let mut writer = ArchiveWriter::create(&path).unwrap();
        assert_eq!(writer.write(&mut tree).unwrap(), 1);
        let len = writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, len);
        let expected = format!(
            "{}class FileEntity\ncreate-time 1\nmodify-time 1\naccess-time 1\n\
             class none\nfilepath f\nchildren 0\nsize 0000000000000006\n\nqwerty",
            ArchiveMetadata::for_host().serialize()
        );
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }

    #[test]
    fn test_sizes_patched_per_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multi.ardat");

        let mut tree = Tree::new();
        let root = tree.add_directory(None, "root", vec![]).unwrap();
        let big = vec![b'z'; COPY_BUFFER_LEN * 2 + 17];
        tree.add_file(Some(root), "big", vec![], FileNode::plain(Content::Bytes(big)))
            .unwrap();
        tree.add_file(Some(root), "small", vec![], FileNode::plain(Content::Bytes(b"s".to_vec())))
            .unwrap();

        let mut writer = ArchiveWriter::create(&path).unwrap();
        writer.write(&mut tree).unwrap();
        writer.finish().unwrap();

        let text = String::from_utf8(std::fs::read(&path).unwrap()).unwrap();
        assert!(text.contains("filepath root\nchildren 2\nsize 0000000000000000\n\n"));
        assert!(text.contains(&format!("filepath root/big\nchildren 0\nsize {:016x}\n\n", COPY_BUFFER_LEN * 2 + 17)));
        assert!(text.ends_with("filepath root/small\nchildren 0\nsize 0000000000000001\n\ns"));
    }

    #[test]
    fn test_existing_target_is_usage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken.ardat");
        std::fs::write(&path, b"keep me").unwrap();

        assert!(matches!(ArchiveWriter::create(&path), Err(ArdatError::Usage(_))));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }
}
