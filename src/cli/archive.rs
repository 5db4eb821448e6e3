use crate::archive::ArchiveWriter;
use crate::error::{ArdatError, Result};
use crate::fs::FsTreeBuilder;
use crate::pipeline::{AesKey, IvGenerator, Strategy};
use crate::tree::{Decorator, FilterKind, Tree, TreeBuilder, TreeWriter};
use log::info;
use std::path::Path;

/// Options for the archive command
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    /// Filters applied to every file, innermost first
    pub filters: Vec<FilterKind>,
    /// Required when `filters` contains an AES filter
    pub key: Option<AesKey>,
}

impl ArchiveOptions {
    /// Single AES layer in the given mode
    pub fn encrypted(key: AesKey, strategy: Strategy) -> Self {
        Self {
            filters: vec![FilterKind::Aes(strategy)],
            key: Some(key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes: u64,
}

/// Pack `src` (a file or directory) into a new archive at `dst`
pub fn archive(src: &Path, dst: &Path) -> Result<ArchiveSummary> {
    archive_with(src, dst, &ArchiveOptions::default())
}

/// Pack `src` with every file encrypted under AES-CBC
pub fn archive_encrypted(src: &Path, dst: &Path, key: &AesKey) -> Result<ArchiveSummary> {
    archive_with(src, dst, &ArchiveOptions::encrypted(key.clone(), Strategy::Cbc))
}

pub fn archive_with(src: &Path, dst: &Path, options: &ArchiveOptions) -> Result<ArchiveSummary> {
    archive_with_ivs(src, dst, options, IvGenerator::new())
}

/// Like [`archive_with`] but drawing IVs from `ivs`
pub fn archive_with_ivs(
    src: &Path,
    dst: &Path,
    options: &ArchiveOptions,
    ivs: IvGenerator,
) -> Result<ArchiveSummary> {
    if dst.exists() {
        return Err(ArdatError::usage(format!("{} already exists", dst.display())));
    }
    info!("archiving {} into {}", src.display(), dst.display());

    let mut builder = FsTreeBuilder::new(src);
    if !options.filters.is_empty() {
        let mut decorator = Decorator::new(options.filters.clone()).with_iv_generator(ivs);
        if let Some(key) = &options.key {
            decorator = decorator.with_key(key.clone());
        }
        builder = builder.with_decorator(decorator);
    }
    let mut tree = builder.build()?;
    write_archive(&mut tree, dst)
}

/// Serialise an already-built tree into a new archive
pub fn write_archive(tree: &mut Tree, dst: &Path) -> Result<ArchiveSummary> {
    let mut writer = ArchiveWriter::create(dst)?;
    let entries = writer.write(tree)?;
    let bytes = writer.finish()?;
    info!("wrote {} entries ({} bytes) to {}", entries, bytes, dst.display());
    Ok(ArchiveSummary { entries, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_archive_counts_entries() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("nested/one.txt"), b"1").unwrap();
        std::fs::write(src.join("two.txt"), b"22").unwrap();

        let summary = archive(&src, &dir.path().join("out.ardat")).unwrap();
        assert_eq!(summary.entries, 4);
        assert!(summary.bytes > 0);
    }

    #[test]
    fn test_archive_refuses_existing_destination() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("f.txt");
        let dst = dir.path().join("taken.ardat");
        std::fs::write(&src, b"x").unwrap();
        std::fs::write(&dst, b"").unwrap();
        assert!(matches!(archive(&src, &dst), Err(ArdatError::Usage(_))));
    }

    #[test]
    fn test_aes_without_key_is_usage_error() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("f.txt");
        std::fs::write(&src, b"x").unwrap();
        let options = ArchiveOptions {
            filters: vec![FilterKind::Aes(Strategy::Ctr)],
            key: None,
        };
        let result = archive_with(&src, &dir.path().join("out.ardat"), &options);
        assert!(matches!(result, Err(ArdatError::Usage(_))));
    }
}
