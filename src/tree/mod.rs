//! In-memory entity tree
//!
//! Nodes live in an arena owned by [`Tree`]; parents are plain indices.
//! Directories hold an ordered child list, files hold a byte source plus
//! the filter layers applied on top of it.

pub mod hierarchy;

pub use hierarchy::FileHierarchy;

use crate::error::{ArdatError, Result};
use crate::header::{Property, CLASS, STRATEGY};
use crate::pipeline::{AesCodec, AesKey, Codec, FilterReader, HexCodec, IvGenerator, Mode, Strategy};
use crate::window::ByteWindow;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::PathBuf;

pub const DIRECTORY_TAG: &str = "DirectoryEntity";
pub const FILE_TAG: &str = "FileEntity";
pub const AES_TAG: &str = "AESEntity";
pub const HEX_TAG: &str = "PrettyEntity";

/// Handle to a node inside a [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Raw bytes backing a file node
pub enum Content {
    /// Opened on first read
    Path(PathBuf),
    Window(ByteWindow),
    Bytes(Vec<u8>),
}

impl Content {
    fn open(self) -> Result<Box<dyn Read>> {
        Ok(match self {
            Self::Path(path) => Box::new(BufReader::new(File::open(path)?)),
            Self::Window(window) => Box::new(window),
            Self::Bytes(bytes) => Box::new(Cursor::new(bytes)),
        })
    }
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "Path({})", path.display()),
            Self::Window(window) => write!(f, "{:?}", window),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// AES filter parameters
#[derive(Debug, Clone)]
pub struct AesLayer {
    strategy: Strategy,
    iv: Vec<u8>,
    key: AesKey,
}

impl AesLayer {
    pub fn new(strategy: Strategy, iv: Vec<u8>, key: AesKey) -> Result<Self> {
        if iv.len() != strategy.iv_len() {
            return Err(ArdatError::corrupted(format!(
                "{} IV must be {} bytes, got {}",
                strategy,
                strategy.iv_len(),
                iv.len()
            )));
        }
        Ok(Self { strategy, iv, key })
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

/// One filter wrapped around a file's content
#[derive(Debug, Clone)]
pub enum Layer {
    Aes(AesLayer),
    Hex,
}

impl Layer {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Aes(_) => AES_TAG,
            Self::Hex => HEX_TAG,
        }
    }

    pub fn properties(&self) -> Vec<Property> {
        match self {
            Self::Aes(aes) => vec![
                Property::new(STRATEGY, aes.strategy.wire_name()),
                Property::new(aes.strategy.iv_key(), hex::encode(&aes.iv)),
            ],
            Self::Hex => Vec::new(),
        }
    }

    /// Fresh codec; cipher state starts over from the IV
    pub fn codec(&self) -> Result<Box<dyn Codec>> {
        Ok(match self {
            Self::Aes(aes) => Box::new(AesCodec::new(
                aes.strategy.instantiate(&aes.key, &aes.iv)?,
            )),
            Self::Hex => Box::new(HexCodec::new()),
        })
    }
}

#[derive(Debug)]
pub struct FileNode {
    content: Option<Content>,
    layers: Vec<Layer>,
    mode: Mode,
}

impl FileNode {
    /// `layers` run innermost first. In `Encode` mode the content is raw
    /// data; in `Decode` mode it is the stored wire form.
    pub fn new(content: Content, layers: Vec<Layer>, mode: Mode) -> Self {
        Self {
            content: Some(content),
            layers,
            mode,
        }
    }

    pub fn plain(content: Content) -> Self {
        Self::new(content, Vec::new(), Mode::Encode)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Directory { children: Vec<NodeId> },
    File(FileNode),
}

#[derive(Debug)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    properties: Vec<Property>,
    kind: NodeKind,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// Base-layer properties (timestamps), without class lines
    pub fn base_properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn base_tag(&self) -> &'static str {
        if self.is_dir() {
            DIRECTORY_TAG
        } else {
            FILE_TAG
        }
    }

    pub fn layers(&self) -> &[Layer] {
        match &self.kind {
            NodeKind::File(file) => file.layers(),
            NodeKind::Directory { .. } => &[],
        }
    }
}

/// Whether `name` can be a single path component
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0', '\n'])
}

/// Arena of nodes with a single root
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(NodeId(0))
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn add_directory(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        properties: Vec<Property>,
    ) -> Result<NodeId> {
        self.insert(parent, name, properties, NodeKind::Directory { children: Vec::new() })
    }

    pub fn add_file(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        properties: Vec<Property>,
        file: FileNode,
    ) -> Result<NodeId> {
        self.insert(parent, name, properties, NodeKind::File(file))
    }

    fn insert(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        properties: Vec<Property>,
        kind: NodeKind,
    ) -> Result<NodeId> {
        if !is_valid_name(name) {
            return Err(ArdatError::usage(format!("invalid entry name {:?}", name)));
        }
        if properties.iter().any(|p| p.key == CLASS) {
            return Err(ArdatError::usage("base properties may not contain class lines"));
        }

        let id = NodeId(self.nodes.len());
        match parent {
            None if !self.nodes.is_empty() => {
                return Err(ArdatError::usage("tree already has a root"));
            }
            None => {}
            Some(parent_id) => {
                let siblings = match self.nodes.get(parent_id.0).map(|n| &n.kind) {
                    Some(NodeKind::Directory { children }) => children,
                    Some(NodeKind::File(_)) => {
                        return Err(ArdatError::usage(format!(
                            "{} is a file and cannot hold children",
                            self.path(parent_id)
                        )));
                    }
                    None => return Err(ArdatError::usage("unknown parent node")),
                };
                if siblings.iter().any(|&s| self.nodes[s.0].name == name) {
                    return Err(ArdatError::usage(format!(
                        "{} already has a child named {}",
                        self.path(parent_id),
                        name
                    )));
                }
                if let NodeKind::Directory { children } = &mut self.nodes[parent_id.0].kind {
                    children.push(id);
                }
            }
        }

        self.nodes.push(Node {
            name: name.to_string(),
            parent,
            properties,
            kind,
        });
        Ok(id)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.node(id).kind {
            NodeKind::Directory { children } => children,
            NodeKind::File(_) => &[],
        }
    }

    /// Local names from the root down to `id`
    pub fn qualified_name(&self, id: NodeId) -> Vec<&str> {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.node(current);
            names.push(node.name.as_str());
            cursor = node.parent;
        }
        names.reverse();
        names
    }

    /// Qualified name joined with `/`
    pub fn path(&self, id: NodeId) -> String {
        self.qualified_name(id).join("/")
    }

    /// Header properties in wire order: base class and its properties,
    /// then each filter layer's class and properties, innermost first.
    pub fn properties(&self, id: NodeId) -> Vec<Property> {
        let node = self.node(id);
        let mut properties = vec![Property::new(CLASS, node.base_tag())];
        properties.extend(node.properties.iter().cloned());
        for layer in node.layers() {
            properties.push(Property::new(CLASS, layer.tag()));
            properties.extend(layer.properties());
        }
        properties
    }

    /// Nodes in breadth-first order from the root
    pub fn breadth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue: VecDeque<NodeId> = self.root().into_iter().collect();
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.children(id).iter().copied());
        }
        order
    }

    /// Stream a node's content through its filters.
    ///
    /// Encoding files apply their layers innermost first; decoding files
    /// peel them off outermost first. A file's content can be taken once.
    pub fn open_content(&mut self, id: NodeId) -> Result<Box<dyn Read>> {
        let label = self.path(id);
        let file = match &mut self.nodes[id.0].kind {
            NodeKind::Directory { .. } => return Ok(Box::new(io::empty())),
            NodeKind::File(file) => file,
        };
        let content = file
            .content
            .take()
            .ok_or_else(|| ArdatError::usage(format!("content of {} was already read", label)))?;

        let mut reader = content.open()?;
        let mode = file.mode;
        let ordered: Box<dyn Iterator<Item = &Layer>> = match mode {
            Mode::Encode => Box::new(file.layers.iter()),
            Mode::Decode => Box::new(file.layers.iter().rev()),
        };
        for layer in ordered {
            reader = Box::new(FilterReader::new(reader, layer.codec()?, mode).with_label(label.clone()));
        }
        Ok(reader)
    }
}

/// Filter selection for files entering an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Aes(Strategy),
    Hex,
}

impl std::str::FromStr for FilterKind {
    type Err = ArdatError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "aes" | "aes-cbc" => Ok(Self::Aes(Strategy::Cbc)),
            "aes-ctr" => Ok(Self::Aes(Strategy::Ctr)),
            "hex" | "pretty" => Ok(Self::Hex),
            _ => Err(ArdatError::usage(format!("unknown filter: {}", s))),
        }
    }
}

/// Wraps files in a configured filter stack, drawing a fresh IV for every
/// AES layer.
pub struct Decorator {
    filters: Vec<FilterKind>,
    key: Option<AesKey>,
    ivs: IvGenerator,
}

impl Decorator {
    pub fn new(filters: Vec<FilterKind>) -> Self {
        Self {
            filters,
            key: None,
            ivs: IvGenerator::new(),
        }
    }

    pub fn with_key(mut self, key: AesKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_iv_generator(mut self, ivs: IvGenerator) -> Self {
        self.ivs = ivs;
        self
    }

    pub fn filters(&self) -> &[FilterKind] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Layers for the next file, innermost first
    pub fn layers(&mut self) -> Result<Vec<Layer>> {
        let mut layers = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            layers.push(match *filter {
                FilterKind::Aes(strategy) => {
                    let key = self
                        .key
                        .clone()
                        .ok_or_else(|| ArdatError::usage("AES filter requires a key"))?;
                    Layer::Aes(AesLayer::new(strategy, self.ivs.generate(strategy), key)?)
                }
                FilterKind::Hex => Layer::Hex,
            });
        }
        Ok(layers)
    }
}

/// Produces a tree one level at a time, breadth first
pub trait TreeBuilder {
    fn build_root(&mut self, tree: &mut Tree) -> Result<NodeId>;

    /// Add every immediate child of the directory `parent`
    fn build_children(&mut self, tree: &mut Tree, parent: NodeId) -> Result<()>;

    fn build(&mut self) -> Result<Tree> {
        let mut tree = Tree::new();
        let root = self.build_root(&mut tree)?;
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            if tree.node(id).is_dir() {
                self.build_children(&mut tree, id)?;
                queue.extend(tree.children(id).iter().copied());
            }
        }
        Ok(tree)
    }
}

/// Consumes a tree node by node, breadth first
pub trait TreeWriter {
    fn write_node(&mut self, tree: &mut Tree, id: NodeId) -> Result<()>;

    /// Write every node; returns how many were written
    fn write(&mut self, tree: &mut Tree) -> Result<usize> {
        let order = tree.breadth_first();
        for &id in &order {
            self.write_node(tree, id)?;
        }
        Ok(order.len())
    }
}
