use crate::archive::ArchiveReader;
use crate::error::Result;
use crate::fs::FsTreeWriter;
use crate::pipeline::AesKey;
use crate::tree::{TreeBuilder, TreeWriter};
use log::info;
use std::path::Path;

/// Options for the extract command
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Needed only if the archive holds AES layers
    pub key: Option<AesKey>,
}

/// Restore the archive at `src` under the existing directory `dst`.
/// Returns the number of entries written.
pub fn extract(src: &Path, dst: &Path) -> Result<usize> {
    extract_with(src, dst, &ExtractOptions::default())
}

pub fn extract_encrypted(src: &Path, dst: &Path, key: &AesKey) -> Result<usize> {
    extract_with(
        src,
        dst,
        &ExtractOptions {
            key: Some(key.clone()),
        },
    )
}

pub fn extract_with(src: &Path, dst: &Path, options: &ExtractOptions) -> Result<usize> {
    let mut writer = FsTreeWriter::new(dst)?;
    let mut reader = ArchiveReader::open(src)?;
    if let Some(key) = &options.key {
        reader = reader.with_key(key.clone());
    }
    info!(
        "extracting {} ({} entries) into {}",
        src.display(),
        reader.entries().len(),
        dst.display()
    );

    let mut tree = reader.build()?;
    let written = writer.write(&mut tree)?;
    info!("restored {} entries", written);
    Ok(written)
}
