use crate::error::{ArdatError, Result};
use crate::header::{read_entry_header, ArchiveMetadata, EntryHeader, HeaderLayer, STRATEGY};
use crate::pipeline::{AesKey, Mode, Strategy};
use crate::tree::{
    is_valid_name, AesLayer, Content, FileHierarchy, FileNode, Layer, NodeId, Tree, TreeBuilder,
    AES_TAG, DIRECTORY_TAG, FILE_TAG, HEX_TAG,
};
use crate::window::WindowFactory;
use log::{debug, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Where one entry sits in the archive
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub header: EntryHeader,
    /// Absolute offset of the first header line
    pub offset: u64,
    pub header_len: u64,
}

impl EntryInfo {
    pub fn content_offset(&self) -> u64 {
        self.offset + self.header_len
    }

    pub fn is_dir(&self) -> bool {
        self.header.base().map_or(false, |b| b.tag == DIRECTORY_TAG)
    }
}

/// Indexes an archive on open and rebuilds its tree on demand.
///
/// File nodes of the rebuilt tree are lazy: each one reads its own window
/// of the archive through the decoding filters named in its header.
pub struct ArchiveReader {
    path: PathBuf,
    metadata: ArchiveMetadata,
    entries: Vec<EntryInfo>,
    index: HashMap<String, usize>,
    hierarchy: FileHierarchy,
    factory: WindowFactory,
    key: Option<AesKey>,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let archive_len = file.metadata()?.len();
        let mut input = BufReader::new(file);

        let (metadata, metadata_len) = ArchiveMetadata::read_from(&mut input)?;
        let mut offset = metadata_len as u64;
        let mut entries = Vec::new();
        let mut index = HashMap::new();
        let mut hierarchy = FileHierarchy::new();

        while let Some((header, header_len)) = read_entry_header(&mut input)? {
            let header_len = header_len as u64;
            let end = (offset + header_len)
                .checked_add(header.size)
                .filter(|&end| end <= archive_len)
                .ok_or_else(|| {
                    ArdatError::corrupted(format!(
                        "{}: size {} runs past the end of the archive",
                        header.filepath, header.size
                    ))
                })?;

            check_filepath(&header.filepath)?;
            if index.contains_key(&header.filepath) {
                return Err(ArdatError::corrupted(format!(
                    "duplicate entry {}",
                    header.filepath
                )));
            }
            debug!("indexed {} at offset {} ({} bytes)", header.filepath, offset, header.size);

            hierarchy.add(&header.filepath);
            index.insert(header.filepath.clone(), entries.len());
            entries.push(EntryInfo {
                header,
                offset,
                header_len,
            });

            input.seek(SeekFrom::Start(end))?;
            offset = end;
        }
        hierarchy.root()?;

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            entries,
            index,
            hierarchy,
            factory: WindowFactory::new(),
            key: None,
        })
    }

    /// Key used for AES layers
    pub fn with_key(mut self, key: AesKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &ArchiveMetadata {
        &self.metadata
    }

    /// Entries in archive order
    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    pub fn entry(&self, filepath: &str) -> Option<&EntryInfo> {
        self.index.get(filepath).map(|&i| &self.entries[i])
    }

    pub fn hierarchy(&self) -> &FileHierarchy {
        &self.hierarchy
    }

    fn reconstruct(&mut self, tree: &mut Tree, parent: Option<NodeId>, filepath: &str) -> Result<NodeId> {
        let info = self
            .index
            .get(filepath)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| ArdatError::corrupted(format!("no entry for {}", filepath)))?;
        let name = filepath.rsplit('/').next().unwrap_or(filepath);

        let mut layers = info.header.layers.iter();
        let base = layers.next().ok_or_else(|| {
            ArdatError::corrupted(format!("{}: header has no base layer", filepath))
        })?;

        let added = match base.tag.as_str() {
            DIRECTORY_TAG => {
                if layers.next().is_some() {
                    return Err(ArdatError::corrupted(format!(
                        "{}: directories cannot carry filters",
                        filepath
                    )));
                }
                tree.add_directory(parent, name, base.properties.clone())
            }
            FILE_TAG => {
                let stack = layers
                    .map(|layer| decode_layer(layer, self.key.as_ref()))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| e.in_entry(filepath))?;
                let window = self
                    .factory
                    .open(&self.path, info.content_offset(), info.header.size)?;
                let file = FileNode::new(Content::Window(window), stack, Mode::Decode);
                tree.add_file(parent, name, base.properties.clone(), file)
            }
            other => {
                return Err(ArdatError::corrupted(format!(
                    "{}: unrecognised base layer {}",
                    filepath, other
                )))
            }
        };
        added.map_err(|e| match e {
            ArdatError::Usage(msg) => ArdatError::CorruptedArchive(msg),
            other => other,
        })
    }
}

impl TreeBuilder for ArchiveReader {
    fn build_root(&mut self, tree: &mut Tree) -> Result<NodeId> {
        let root = self.hierarchy.root()?.to_string();
        self.reconstruct(tree, None, &root)
    }

    fn build_children(&mut self, tree: &mut Tree, parent: NodeId) -> Result<()> {
        let path = tree.path(parent);
        let children = self.hierarchy.children(&path).to_vec();
        if let Some(info) = self.entry(&path) {
            if info.header.children != children.len() {
                warn!(
                    "{} records {} children but the archive holds {}",
                    path,
                    info.header.children,
                    children.len()
                );
            }
        }
        for child in &children {
            self.reconstruct(tree, Some(parent), child)?;
        }
        Ok(())
    }
}

/// Every component must be a plain name: no `.`, `..`, empty or absolute parts
fn check_filepath(filepath: &str) -> Result<()> {
    if filepath.split('/').all(is_valid_name) {
        Ok(())
    } else {
        Err(ArdatError::corrupted(format!("unsafe filepath {:?}", filepath)))
    }
}

fn decode_layer(layer: &HeaderLayer, key: Option<&AesKey>) -> Result<Layer> {
    match layer.tag.as_str() {
        AES_TAG => {
            let strategy: Strategy = layer.require(STRATEGY)?.parse().map_err(|_| {
                ArdatError::corrupted(format!("unknown AES strategy {:?}", layer.get(STRATEGY)))
            })?;
            let iv = hex::decode(layer.require(strategy.iv_key())?)
                .map_err(|e| ArdatError::corrupted(format!("malformed IV: {}", e)))?;
            let key = key.ok_or_else(|| {
                ArdatError::usage("archive content is encrypted; a key is required")
            })?;
            Ok(Layer::Aes(AesLayer::new(strategy, iv, key.clone())?))
        }
        HEX_TAG => Ok(Layer::Hex),
        other => Err(ArdatError::corrupted(format!("unrecognised layer tag {}", other))),
    }
}
