//! Host filesystem side of archiving: build a tree from a directory walk,
//! and write a tree back out to disk.

use crate::error::{ArdatError, Result};
use crate::header::{find, Property, ACCESS_TIME, CREATE_TIME, MODIFY_TIME};
use crate::tree::{Content, Decorator, FileNode, NodeId, Tree, TreeBuilder, TreeWriter};
use crate::pipeline::Mode;
use filetime::FileTime;
use log::{debug, warn};
use std::collections::HashMap;
use std::fs::{self, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Walks a file or directory one level at a time
pub struct FsTreeBuilder {
    root: PathBuf,
    decorator: Option<Decorator>,
    paths: HashMap<NodeId, PathBuf>,
}

impl FsTreeBuilder {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            decorator: None,
            paths: HashMap::new(),
        }
    }

    /// Wrap every file in the decorator's filter stack
    pub fn with_decorator(mut self, decorator: Decorator) -> Self {
        self.decorator = Some(decorator);
        self
    }

    fn add_entry(
        &mut self,
        tree: &mut Tree,
        parent: Option<NodeId>,
        path: PathBuf,
        name: &str,
    ) -> Result<NodeId> {
        let metadata = fs::metadata(&path)?;
        let properties = timestamp_properties(&metadata)?;

        let id = if metadata.is_dir() {
            tree.add_directory(parent, name, properties)?
        } else if metadata.is_file() {
            let layers = match self.decorator.as_mut() {
                Some(decorator) => decorator.layers()?,
                None => Vec::new(),
            };
            let file = FileNode::new(Content::Path(path.clone()), layers, Mode::Encode);
            tree.add_file(parent, name, properties, file)?
        } else {
            return Err(ArdatError::usage(format!(
                "{} is neither a file nor a directory",
                path.display()
            )));
        };
        self.paths.insert(id, path);
        Ok(id)
    }
}

impl TreeBuilder for FsTreeBuilder {
    fn build_root(&mut self, tree: &mut Tree) -> Result<NodeId> {
        let root = self.root.clone();
        let name = match root.file_name() {
            Some(name) => name.to_os_string(),
            None => fs::canonicalize(&root)?
                .file_name()
                .map(|n| n.to_os_string())
                .ok_or_else(|| {
                    ArdatError::usage(format!("cannot archive {}: it has no name", root.display()))
                })?,
        };
        let name = utf8_name(&name, &root)?;
        self.add_entry(tree, None, root, &name)
    }

    fn build_children(&mut self, tree: &mut Tree, parent: NodeId) -> Result<()> {
        let dir = match self.paths.get(&parent) {
            Some(dir) => dir.clone(),
            None => return Err(ArdatError::usage("directory node has no source path")),
        };

        let mut entries = fs::read_dir(&dir)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            if entry.file_type()?.is_symlink() {
                warn!("skipping symbolic link {}", path.display());
                continue;
            }
            let name = utf8_name(&entry.file_name(), &path)?;
            self.add_entry(tree, Some(parent), path, &name)?;
        }
        Ok(())
    }
}

fn utf8_name(name: &std::ffi::OsStr, path: &Path) -> Result<String> {
    name.to_str()
        .map(str::to_string)
        .ok_or_else(|| ArdatError::usage(format!("{} is not valid UTF-8", path.display())))
}

/// `create-time`, `modify-time`, `access-time` in milliseconds since the epoch.
/// Hosts without birth or access times fall back to the modification time.
pub fn timestamp_properties(metadata: &Metadata) -> Result<Vec<Property>> {
    let modified = metadata.modified()?;
    let created = metadata.created().unwrap_or(modified);
    let accessed = metadata.accessed().unwrap_or(modified);
    Ok(vec![
        Property::new(CREATE_TIME, to_millis(created).to_string()),
        Property::new(MODIFY_TIME, to_millis(modified).to_string()),
        Property::new(ACCESS_TIME, to_millis(accessed).to_string()),
    ])
}

pub fn to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_millis()).map_or(i64::MIN, |ms| -ms),
    }
}

pub fn file_time(millis: i64) -> FileTime {
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    FileTime::from_unix_time(millis.div_euclid(1000), nanos)
}

fn millis_property(properties: &[Property], key: &str) -> Result<Option<i64>> {
    find(properties, key)
        .map(|value| {
            value.parse::<i64>().map_err(|_| {
                ArdatError::corrupted(format!("{} {:?} is not a millisecond timestamp", key, value))
            })
        })
        .transpose()
}

/// Apply recorded access and modification times to `path`
pub fn restore_times(path: &Path, properties: &[Property]) -> Result<()> {
    if let Some(accessed) = millis_property(properties, ACCESS_TIME)? {
        filetime::set_file_atime(path, file_time(accessed))?;
    }
    if let Some(modified) = millis_property(properties, MODIFY_TIME)? {
        filetime::set_file_mtime(path, file_time(modified))?;
    }
    if find(properties, CREATE_TIME).is_some() {
        debug!("create-time of {} is recorded but not restored", path.display());
    }
    Ok(())
}

/// Recreates a tree under an existing destination directory
pub struct FsTreeWriter {
    destination: PathBuf,
}

impl FsTreeWriter {
    pub fn new(destination: &Path) -> Result<Self> {
        if !destination.is_dir() {
            return Err(ArdatError::usage(format!(
                "{} is not an existing directory",
                destination.display()
            )));
        }
        Ok(Self {
            destination: destination.to_path_buf(),
        })
    }

    pub fn target(&self, tree: &Tree, id: NodeId) -> PathBuf {
        tree.qualified_name(id)
            .into_iter()
            .fold(self.destination.clone(), |path, name| path.join(name))
    }
}

impl TreeWriter for FsTreeWriter {
    fn write_node(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        let target = self.target(tree, id);
        let parent_dir = target.parent().map(Path::to_path_buf).unwrap_or_else(|| self.destination.clone());
        let parent_meta = fs::metadata(&parent_dir)?;

        if tree.node(id).is_dir() {
            fs::create_dir(&target).map_err(|e| exists_as_usage(e, &target))?;
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .map_err(|e| exists_as_usage(e, &target))?;
            let mut content = tree.open_content(id)?;
            let copied = io::copy(&mut content, &mut file).map_err(ArdatError::from)?;
            debug!("restored {} ({} bytes)", target.display(), copied);
        }

        restore_times(&target, tree.node(id).base_properties())?;
        filetime::set_file_times(
            &parent_dir,
            FileTime::from_last_access_time(&parent_meta),
            FileTime::from_last_modification_time(&parent_meta),
        )?;
        Ok(())
    }
}

fn exists_as_usage(err: io::Error, path: &Path) -> ArdatError {
    if err.kind() == io::ErrorKind::AlreadyExists {
        ArdatError::usage(format!("{} already exists", path.display()))
    } else {
        ArdatError::from(err)
    }
}
